//! Command execution.

use crate::Commands;
use colored::Colorize;
use fflink_client::Client;
use fflink_protocol::MAX_FILENAME_LEN;
use serde_json::json;

/// Executes a subcommand and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Info => {
            let info = client.info().await?;
            format_json(&info)
        }

        Commands::Temp => {
            let report = client.temperature().await?;
            format_json(&report)
        }

        Commands::Position => {
            let position = client.position().await?;
            format_json(&position)
        }

        Commands::Status => {
            let report = client.endstops().await?;
            format_json(&report)
        }

        Commands::Progress => {
            let report = client.progress().await?;
            format_json(&json!({
                "printed_bytes": report.printed_bytes,
                "total_bytes": report.total_bytes,
                "percentage": report.percentage(),
            }))
        }

        Commands::Home { axis } => {
            client.home(axis.map(Into::into)).await?;
            Ok(match axis {
                Some(axis) => format!(
                    "{} axis {}",
                    "Homed".green(),
                    fflink_protocol::Axis::from(axis)
                ),
                None => format!("{} all axes", "Homed".green()),
            })
        }

        Commands::Move { x, y, z, speed } => {
            client.move_to(x, y, z, speed).await?;
            Ok("Move accepted".green().to_string())
        }

        Commands::Led { r, g, b } => {
            client.set_led(r, g, b).await?;
            Ok(format!("{} to rgb({}, {}, {})", "LED set".green(), r, g, b))
        }

        Commands::Pause => {
            client.pause().await?;
            Ok("Print paused".green().to_string())
        }

        Commands::Resume => {
            client.resume().await?;
            Ok("Print resumed".green().to_string())
        }

        Commands::Stop => {
            client.stop().await?;
            Ok("Print cancelled".yellow().to_string())
        }

        Commands::Upload { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or("file has no usable name; pass --name")?
                    .to_string(),
            };
            if name.len() > MAX_FILENAME_LEN {
                return Err(format!(
                    "name {:?} is longer than {} bytes; pass a shorter --name",
                    name, MAX_FILENAME_LEN
                )
                .into());
            }

            let content = tokio::fs::read(&file).await?;
            let size = content.len();
            client.upload_file(&name, &content).await?;
            Ok(format!(
                "{} {} ({} bytes) as 0:/user/{}",
                "Uploaded".green(),
                file.display(),
                size,
                name.cyan()
            ))
        }
    }
}

fn format_json<T: serde::Serialize>(value: &T) -> Result<String, Box<dyn std::error::Error>> {
    Ok(serde_json::to_string_pretty(value)?)
}
