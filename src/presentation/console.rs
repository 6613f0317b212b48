//! Console host
//!
//! Line-oriented front end: reports tracker state and sample counts, sends
//! button presses, and drives the simulated central when the loopback radio
//! is in use.

use crate::domain::models::{ButtonId, HostEvent, MessageSeverity};
use crate::infrastructure::bluetooth::loopback::LoopbackCentral;
use crate::infrastructure::bluetooth::protocol::{self, CharacteristicId};
use crate::infrastructure::bluetooth::radio::AttResponse;
use crate::infrastructure::bluetooth::TrackerHandle;
use nalgebra::UnitQuaternion;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const HELP: &str = "\
commands:
  press <id>              notify a button press
  disconnect-request [n]  ask the central to disconnect
  clear                   clear recorded samples
  quit                    disable the tracker and exit
loopback central:
  power on|off            toggle the simulated radio
  connect | drop          connect or disconnect the central
  subscribe <name>        subscribe (orientation, button-pressed)
  unsubscribe <name>      unsubscribe
  rate <hz>               write the update rate
  read-rate               read the update rate
  response <request>      show the answer to a read or write
  reset-heading           write the reset-heading characteristic
  last                    decode the last orientation notification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Press(ButtonId),
    RequestDisconnection(ButtonId),
    Clear,
    Help,
    Quit,
    Power(bool),
    Connect,
    Drop,
    Subscribe(CharacteristicId),
    Unsubscribe(CharacteristicId),
    WriteRate(Vec<u8>),
    ReadRate,
    Response(u64),
    ResetHeading,
    Last,
}

fn characteristic(name: Option<&str>) -> Result<CharacteristicId, String> {
    let name = name.ok_or("missing characteristic name")?;
    CharacteristicId::ALL
        .into_iter()
        .find(|c| c.to_string() == name)
        .ok_or_else(|| format!("unknown characteristic '{}'", name))
}

fn byte(arg: Option<&str>, default: Option<u8>) -> Result<u8, String> {
    match (arg, default) {
        (Some(value), _) => value
            .parse()
            .map_err(|_| format!("'{}' is not a byte value", value)),
        (None, Some(default)) => Ok(default),
        (None, None) => Err("missing value".to_string()),
    }
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err("empty command".to_string());
        };
        let arg = words.next();

        let parsed = match command {
            "press" => Self::Press(byte(arg, None)?),
            "disconnect-request" => Self::RequestDisconnection(byte(arg, Some(0))?),
            "clear" => Self::Clear,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "power" => match arg {
                Some("on") => Self::Power(true),
                Some("off") => Self::Power(false),
                _ => return Err("usage: power on|off".to_string()),
            },
            "connect" => Self::Connect,
            "drop" => Self::Drop,
            "subscribe" => Self::Subscribe(characteristic(arg)?),
            "unsubscribe" => Self::Unsubscribe(characteristic(arg)?),
            // Raw bytes so malformed payloads can be tried as well
            "rate" => Self::WriteRate(
                arg.into_iter()
                    .chain(words)
                    .map(|b| byte(Some(b), None))
                    .collect::<Result<_, _>>()?,
            ),
            "read-rate" => Self::ReadRate,
            "response" => Self::Response(
                arg.ok_or("missing request id")?
                    .parse()
                    .map_err(|_| "request id must be a number".to_string())?,
            ),
            "reset-heading" => Self::ResetHeading,
            "last" => Self::Last,
            other => return Err(format!("unknown command '{}'", other)),
        };
        Ok(parsed)
    }
}

/// Render a host event as one console line, or nothing
pub fn describe(event: &HostEvent) -> Option<String> {
    match event {
        HostEvent::Status(status) => {
            let tag = match status.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            Some(format!("[{}] {}", tag, status.message))
        }
        HostEvent::StateChanged(state) => Some(format!("state: {}", state)),
        HostEvent::SampleCount(count) if *count == 0 || count % 100 == 0 => {
            Some(format!("samples: {}", count))
        }
        HostEvent::SampleCount(_) => None,
        HostEvent::ButtonNotified(button) => Some(format!("button {} sent", button)),
    }
}

fn describe_last(central: &LoopbackCentral) -> String {
    let Some(packet) = central
        .notifications_for(CharacteristicId::Orientation)
        .pop()
    else {
        return "no orientation notifications yet".to_string();
    };
    match protocol::decode_orientation(&packet) {
        Ok(decoded) => {
            let (roll, pitch, yaw) =
                UnitQuaternion::from_quaternion(decoded.quaternion()).euler_angles();
            format!(
                "t={}us roll={:.1} pitch={:.1} yaw={:.1} (deg)",
                decoded.timestamp_micros,
                roll.to_degrees(),
                pitch.to_degrees(),
                yaw.to_degrees()
            )
        }
        Err(e) => format!("undecodable packet: {}", e),
    }
}

pub struct ConsoleApp {
    handle: TrackerHandle,
    central: Option<LoopbackCentral>,
    host_rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl ConsoleApp {
    pub fn new(
        handle: TrackerHandle,
        central: Option<LoopbackCentral>,
        host_rx: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Self {
        Self {
            handle,
            central,
            host_rx,
        }
    }

    /// Run until `quit`, end of input or Ctrl-C, then disable the tracker
    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("Type 'help' for commands.");
        let outcome = self.read_commands().await;

        if let Err(e) = self.handle.disable().await {
            warn!("Tracker already stopped: {}", e);
        }
        outcome
    }

    async fn read_commands(&mut self) -> anyhow::Result<()> {
        let Self {
            handle,
            central,
            host_rx,
        } = self;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { return Ok(()) };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match ConsoleCommand::parse(&line) {
                        Ok(ConsoleCommand::Quit) => return Ok(()),
                        Ok(command) => execute(handle, central.as_ref(), command),
                        Err(e) => println!("{}", e),
                    }
                }
                Some(event) = host_rx.recv() => {
                    if let Some(line) = describe(&event) {
                        println!("{}", line);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    return Ok(());
                }
            }
        }
    }
}

fn execute(handle: &TrackerHandle, central: Option<&LoopbackCentral>, command: ConsoleCommand) {
    let sent = match command {
        ConsoleCommand::Press(button) => handle.press_button(button),
        ConsoleCommand::RequestDisconnection(group) => handle.request_disconnection(group),
        ConsoleCommand::Clear => handle.clear_recording(),
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
        command => {
            match central {
                Some(central) => drive_central(central, command),
                None => println!("central commands need the loopback radio"),
            }
            Ok(())
        }
    };
    if let Err(e) = sent {
        error!("Command failed: {}", e);
    }
}

fn drive_central(central: &LoopbackCentral, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Power(true) => central.power_on(),
        ConsoleCommand::Power(false) => central.power_off(),
        ConsoleCommand::Connect => central.connect(),
        ConsoleCommand::Drop => central.disconnect(),
        ConsoleCommand::Subscribe(c) => central.subscribe(c),
        ConsoleCommand::Unsubscribe(c) => central.unsubscribe(c),
        ConsoleCommand::WriteRate(value) => {
            let request = central.write(CharacteristicId::UpdateRate, &value);
            println!("write request {} sent", request);
        }
        ConsoleCommand::ReadRate => {
            let request = central.read(CharacteristicId::UpdateRate);
            println!("read request {} sent", request);
        }
        ConsoleCommand::Response(request) => match central.response(request) {
            Some(response) => println!("{}", describe_response(&response)),
            None => println!("request {} is unanswered", request),
        },
        ConsoleCommand::ResetHeading => {
            central.write(CharacteristicId::ResetHeading, &[1]);
        }
        ConsoleCommand::Last => println!("{}", describe_last(central)),
        _ => {}
    }
}

/// One-line summary of an answered request
pub fn describe_response(response: &AttResponse) -> String {
    match response {
        AttResponse::Success(value) if value.is_empty() => "ok".to_string(),
        AttResponse::Success(value) => format!("ok {:02x?}", value),
        AttResponse::Failure(error) => format!("error 0x{:02X} ({:?})", error.code(), error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PeripheralState, StatusMessage};
    use crate::infrastructure::bluetooth::radio::AttError;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("press 3"), Ok(ConsoleCommand::Press(3)));
        assert_eq!(
            ConsoleCommand::parse("disconnect-request"),
            Ok(ConsoleCommand::RequestDisconnection(0))
        );
        assert_eq!(
            ConsoleCommand::parse("subscribe orientation"),
            Ok(ConsoleCommand::Subscribe(CharacteristicId::Orientation))
        );
        assert_eq!(
            ConsoleCommand::parse("rate 10"),
            Ok(ConsoleCommand::WriteRate(vec![10]))
        );
        assert_eq!(
            ConsoleCommand::parse("rate 1 2"),
            Ok(ConsoleCommand::WriteRate(vec![1, 2]))
        );
        assert_eq!(ConsoleCommand::parse("  quit "), Ok(ConsoleCommand::Quit));
        assert_eq!(
            ConsoleCommand::parse("response 4"),
            Ok(ConsoleCommand::Response(4))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("press").is_err());
        assert!(ConsoleCommand::parse("press 300").is_err());
        assert!(ConsoleCommand::parse("subscribe gyro").is_err());
        assert!(ConsoleCommand::parse("power maybe").is_err());
        assert!(ConsoleCommand::parse("fly").is_err());
    }

    #[test]
    fn test_describe_events() {
        assert_eq!(
            describe(&HostEvent::StateChanged(PeripheralState::Advertising)).as_deref(),
            Some("state: Advertising")
        );
        assert_eq!(describe(&HostEvent::SampleCount(7)), None);
        assert_eq!(
            describe(&HostEvent::SampleCount(200)).as_deref(),
            Some("samples: 200")
        );
        assert_eq!(
            describe(&HostEvent::Status(StatusMessage::new(
                "Bluetooth is off",
                MessageSeverity::Warning
            )))
            .as_deref(),
            Some("[warn] Bluetooth is off")
        );
    }

    #[test]
    fn test_describe_response() {
        assert_eq!(describe_response(&AttResponse::Success(vec![])), "ok");
        assert_eq!(describe_response(&AttResponse::Success(vec![0x0a])), "ok [0a]");
        assert_eq!(
            describe_response(&AttResponse::Failure(AttError::InvalidAttributeValueLength)),
            "error 0x0D (InvalidAttributeValueLength)"
        );
    }
}
