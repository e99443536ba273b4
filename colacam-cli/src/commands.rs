//! Command execution.

use crate::{Cli, Commands};
use colacam_client::DeviceControl;
use colacam_stream::{tcp_connector, DepthMapHandler, Frame, FrameGrabber, GrabberConfig};
use colored::Colorize;
use std::time::Duration;

/// Executes the command line's command and returns the formatted output.
pub fn execute(device: &DeviceControl, cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Ident => {
            let ident = device.device_ident()?;
            Ok(format!("{} {}", "Device".bold(), ident.cyan()))
        }

        Commands::Start => {
            device.start_acquisition()?;
            Ok("Acquisition started".green().to_string())
        }

        Commands::Stop => {
            device.stop_acquisition()?;
            Ok("Acquisition stopped".green().to_string())
        }

        Commands::Step => {
            device.step_acquisition()?;
            Ok("Frame requested".green().to_string())
        }

        Commands::Read { name } => {
            let reply = device.session().read_variable(name)?;
            let params = reply.parameters()?;
            Ok(format!(
                "{} ({} bytes)\n{}",
                name.cyan(),
                params.len(),
                hex_dump(params)
            ))
        }

        Commands::Grab {
            count,
            timeout_ms,
            start,
        } => {
            let grabber = FrameGrabber::new(GrabberConfig::default());
            grabber.start(
                tcp_connector(cli.host.clone(), cli.stream_port, cli.connect_timeout()),
                DepthMapHandler::new(),
            )?;
            if *start {
                device.stop_acquisition()?;
                device.start_acquisition()?;
            }

            let timeout = Duration::from_millis(*timeout_ms);
            let mut lines = Vec::new();
            for _ in 0..*count {
                match grabber.get_next_frame(timeout) {
                    Some(frame) => lines.push(format_frame(&frame)),
                    None => {
                        lines.push(format!("{}", "Timed out waiting for frame".yellow()));
                        break;
                    }
                }
            }

            if *start {
                device.stop_acquisition()?;
            }
            grabber.stop();
            Ok(lines.join("\n"))
        }
    }
}

fn format_frame(frame: &Frame) -> String {
    let range = match frame.valid_range() {
        Some((lo, hi)) => format!("{}..={}", lo, hi),
        None => "-".to_string(),
    };
    format!(
        "frame {} {}x{} t={}ms range={}",
        frame.sequence.to_string().cyan(),
        frame.width,
        frame.height,
        frame.timestamp_ms,
        range
    )
}

/// Sixteen bytes per line, offset first.
fn hex_dump(data: &[u8]) -> String {
    if data.is_empty() {
        return "(no parameters)".dimmed().to_string();
    }
    data.chunks(16)
        .enumerate()
        .map(|(i, chunk)| format!("{:08x}  {}", i * 16, hex::encode(chunk)))
        .collect::<Vec<_>>()
        .join("\n")
}
