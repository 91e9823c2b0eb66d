//! Simulator console
//!
//! Line-oriented stand-in for the panel when no surface is attached: button
//! presses and encoder turns go through the same channel as the scanner,
//! expander pins of the simulated panel can be driven directly, MIDI bytes
//! go through the router, and the LED matrix can be printed.

use std::sync::Arc;

use anyhow::Result;
use colored::*;
use crossbeam::channel::Sender;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::context::HardwareContext;
use crate::input::scanner::PIN_COUNT;
use crate::input::{ControlEvent, RouteOutcome};
use crate::led::registers::FRAME_COUNT;
use crate::midi::{parse_hex, ports};
use crate::patch::PatchValue;

const PROMPT: &str = "synth> ";

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Dump,
    Get(String),
    Set { parameter: String, value: PatchValue },
    Press(String),
    Release(String),
    Turn { control: String, detents: i32 },
    Pin { pin: u8, high: bool },
    Midi(Vec<u8>),
    Patch(String),
    Patches,
    Leds(u8),
    Status,
    Ports,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> std::result::Result<Option<Command>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();
        let arg = |i: usize, what: &str| {
            rest.get(i)
                .map(|s| s.to_string())
                .ok_or_else(|| format!("{}: missing {}", verb, what))
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "help" | "?" => Command::Help,
            "dump" => Command::Dump,
            "get" => Command::Get(arg(0, "module.name")?),
            "set" => Command::Set {
                parameter: arg(0, "module.name")?,
                value: parse_value(&arg(1, "value")?),
            },
            "press" => Command::Press(arg(0, "control")?),
            "release" => Command::Release(arg(0, "control")?),
            "turn" => {
                let control = arg(0, "control")?;
                let detents = match rest.get(1) {
                    Some(n) => n.parse().map_err(|_| format!("turn: '{}' is not a detent count", n))?,
                    None => 1,
                };
                Command::Turn { control, detents }
            }
            "pin" => {
                let pin = arg(0, "pin number")?
                    .parse::<u8>()
                    .ok()
                    .filter(|p| *p < PIN_COUNT)
                    .ok_or_else(|| format!("pin: number must be 0-{}", PIN_COUNT - 1))?;
                let high = match arg(1, "level")?.to_ascii_lowercase().as_str() {
                    "high" | "1" => true,
                    "low" | "0" => false,
                    other => return Err(format!("pin: level '{}' is not low or high", other)),
                };
                Command::Pin { pin, high }
            }
            "midi" => {
                let bytes = parse_hex(&rest.join(" ")).ok_or("midi: expected hex bytes, e.g. 'midi B0 07 40'")?;
                Command::Midi(bytes)
            }
            "patch" => Command::Patch(arg(0, "patch name")?),
            "patches" => Command::Patches,
            "leds" => {
                let frame = match rest.first() {
                    Some(n) => n
                        .parse::<u8>()
                        .ok()
                        .filter(|f| *f < FRAME_COUNT)
                        .ok_or_else(|| format!("leds: frame must be 0-{}", FRAME_COUNT - 1))?,
                    None => 0,
                };
                Command::Leds(frame)
            }
            "status" => Command::Status,
            "ports" => Command::Ports,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

/// `on`/`off`/`true`/`false`, a number, or an enumeration state name
fn parse_value(text: &str) -> PatchValue {
    match text.to_ascii_lowercase().as_str() {
        "on" | "true" => PatchValue::Bool(true),
        "off" | "false" => PatchValue::Bool(false),
        _ => text
            .parse::<f64>()
            .map(PatchValue::Number)
            .unwrap_or_else(|_| PatchValue::State(text.to_string())),
    }
}

pub enum Reply {
    Lines(Vec<String>),
    Quit,
}

pub struct Console {
    context: Arc<HardwareContext>,
    events: Sender<ControlEvent>,
}

impl Console {
    pub fn new(context: Arc<HardwareContext>, events: Sender<ControlEvent>) -> Self {
        Self { context, events }
    }

    /// Blocking read-eval loop; returns on `quit`, Ctrl-D or Ctrl-C
    pub fn run(&self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        println!("{}", "=== Synth Surface Console ===".bold().cyan());
        println!("Type {} for commands\n", "help".green());

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line.as_str());
                    match Command::parse(&line) {
                        Ok(Some(command)) => match self.execute(command) {
                            Reply::Lines(lines) => {
                                for line in lines {
                                    println!("{}", line);
                                }
                            }
                            Reply::Quit => break,
                        },
                        Ok(None) => {}
                        Err(message) => println!("{}", message.red()),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn execute(&self, command: Command) -> Reply {
        let ctx = &self.context;
        let lines = match command {
            Command::Help => help(),
            Command::Dump => ctx.rack().dump(),
            Command::Get(path) => match ctx.rack().lookup(&path) {
                Some(p) => vec![format!("{} = {}", path, p.formatted().green())],
                None => vec![format!("unknown parameter '{}'", path).red().to_string()],
            },
            Command::Set { parameter, value } => match ctx.rack().lookup(&parameter) {
                Some(p) => match value.resolve(p.domain()) {
                    Some(v) => {
                        let changed = p.set_value(v);
                        let mark = if changed { "" } else { " (unchanged)" };
                        vec![format!("{} = {}{}", parameter, p.formatted().green(), mark)]
                    }
                    None => vec![format!("{:?} does not fit {}", value, parameter).red().to_string()],
                },
                None => vec![format!("unknown parameter '{}'", parameter).red().to_string()],
            },
            Command::Press(control) => self.send(ControlEvent::Pressed(control)),
            Command::Release(control) => self.send(ControlEvent::Released(control)),
            Command::Turn { control, detents } => self.send(ControlEvent::Rotated { control, detents }),
            Command::Pin { pin, high } => match ctx.simulated_panel() {
                Some(panel) => {
                    panel.set_level(pin, high);
                    vec![format!("pins = {:016b}", panel.levels())]
                }
                None => vec!["panel is not simulated".yellow().to_string()],
            },
            Command::Midi(bytes) => {
                let outcome = ctx.router().route(&bytes);
                let text = match outcome {
                    RouteOutcome::Committed { parameter, changed } => {
                        let value = ctx
                            .rack()
                            .lookup(&parameter)
                            .map(|p| p.formatted())
                            .unwrap_or_default();
                        let mark = if changed { "" } else { " (unchanged)" };
                        format!("{} = {}{}", parameter, value.green(), mark)
                    }
                    other => format!("{:?}", other),
                };
                vec![text]
            }
            Command::Patch(name) => {
                if ctx.recall(&name) {
                    vec![format!("patch '{}' recalled", name).green().to_string()]
                } else {
                    vec![format!("no patch named '{}'", name).red().to_string()]
                }
            }
            Command::Patches => {
                let names = ctx.patch_names();
                if names.is_empty() {
                    vec!["no patches configured".to_string()]
                } else {
                    names.into_iter().map(str::to_string).collect()
                }
            }
            Command::Leds(frame) => match ctx.simulated_led() {
                Some(bus) => bus.render_frame(frame),
                None => vec!["LED matrix is not simulated".yellow().to_string()],
            },
            Command::Status => ctx.status(),
            Command::Ports => {
                ports::print_ports();
                Vec::new()
            }
            Command::Quit => return Reply::Quit,
        };
        Reply::Lines(lines)
    }

    fn send(&self, event: ControlEvent) -> Vec<String> {
        let control = event.control().to_string();
        if !self.context.controls().is_bound(&control) {
            return vec![format!("'{}' is not bound (bound: {})", control, self.context.controls().controls().join(", "))
                .yellow()
                .to_string()];
        }
        match self.events.send(event) {
            Ok(()) => Vec::new(),
            Err(_) => vec!["control scan loop is not running".red().to_string()],
        }
    }
}

fn help() -> Vec<String> {
    [
        "dump                     all parameters",
        "get <module.name>        one parameter",
        "set <module.name> <v>    number, on/off or state name",
        "press|release <control>  panel button",
        "turn <control> [n]       encoder, n detents (negative = ccw)",
        "pin <n> low|high         drive a simulated panel pin (low = pressed)",
        "midi <hex bytes>         inject a MIDI message",
        "patch <name>             recall a patch",
        "patches                  list patches",
        "leds [frame]             show the simulated LED matrix",
        "status                   subsystems",
        "ports                    MIDI ports",
        "quit                     exit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::input::ControlBinding;
    use crate::parameter::ParamValue;

    fn console() -> (Console, crossbeam::channel::Receiver<ControlEvent>) {
        let mut config = AppConfig::default();
        config
            .controls
            .insert("enc1".into(), ControlBinding::Step { parameter: "vcf.Cutoff".into() });
        let ctx = Arc::new(HardwareContext::build(&config, true).unwrap());
        let (tx, rx) = crossbeam::channel::unbounded();
        (Console::new(ctx, tx), rx)
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("turn enc1 -3").unwrap(),
            Some(Command::Turn { control: "enc1".into(), detents: -3 })
        );
        assert_eq!(
            Command::parse("turn enc1").unwrap(),
            Some(Command::Turn { control: "enc1".into(), detents: 1 })
        );
        assert_eq!(
            Command::parse("set vco3340.Sync on").unwrap(),
            Some(Command::Set { parameter: "vco3340.Sync".into(), value: PatchValue::Bool(true) })
        );
        assert_eq!(
            Command::parse("set vco3340.Shape Pulse").unwrap(),
            Some(Command::Set { parameter: "vco3340.Shape".into(), value: PatchValue::State("Pulse".into()) })
        );
        assert_eq!(Command::parse("midi 90 3C 64").unwrap(), Some(Command::Midi(vec![0x90, 0x3C, 0x64])));
        assert_eq!(Command::parse("EXIT").unwrap(), Some(Command::Quit));

        assert_eq!(Command::parse("pin 3 low").unwrap(), Some(Command::Pin { pin: 3, high: false }));
        assert_eq!(Command::parse("PIN 15 High").unwrap(), Some(Command::Pin { pin: 15, high: true }));
        assert!(Command::parse("pin 16 low").is_err());
        assert!(Command::parse("pin 3 sideways").is_err());
        assert!(Command::parse("pin 3").is_err());

        assert!(Command::parse("midi").is_err());
        assert!(Command::parse("midi zz").is_err());
        assert!(Command::parse("leds 8").is_err());
        assert!(Command::parse("get").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn test_set_and_midi_commands_hit_the_rack() {
        let (console, _rx) = console();
        console.execute(Command::Set { parameter: "vco3340.Octave".into(), value: PatchValue::Number(5.0) });
        assert_eq!(
            console.context.rack().lookup("vco3340.Octave").unwrap().value(),
            ParamValue::Int(3)
        );

        console.execute(Command::Midi(vec![0xB0, 7, 127]));
        assert_eq!(
            console.context.rack().lookup("vco3340.Duty").unwrap().value(),
            ParamValue::Ratio(1.0)
        );
    }

    #[test]
    fn test_bound_controls_go_to_the_scan_channel() {
        let (console, rx) = console();
        console.execute(Command::Turn { control: "enc1".into(), detents: 2 });
        console.execute(Command::Press("unbound".into()));

        assert_eq!(
            rx.try_recv().unwrap(),
            ControlEvent::Rotated { control: "enc1".into(), detents: 2 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pin_command_drives_simulated_panel() {
        let mut config = AppConfig::default();
        config.scanner.buttons.insert(2, "btn1".into());
        let ctx = Arc::new(HardwareContext::build(&config, true).unwrap());
        let (tx, _rx) = crossbeam::channel::unbounded();
        let wired = Console::new(ctx.clone(), tx);

        wired.execute(Command::Pin { pin: 2, high: false });
        assert_eq!(ctx.simulated_panel().unwrap().levels(), 0xFFFB);

        // without panel pins there is nothing to drive
        let (plain, _rx) = console();
        match plain.execute(Command::Pin { pin: 2, high: false }) {
            Reply::Lines(lines) => assert!(lines[0].contains("not simulated")),
            Reply::Quit => panic!("pin should not quit"),
        }
    }

    #[test]
    fn test_leds_render_simulated_frame() {
        let (console, _rx) = console();
        match console.execute(Command::Leds(0)) {
            Reply::Lines(lines) => assert_eq!(lines.len(), 9),
            Reply::Quit => panic!("leds should not quit"),
        }
        assert!(matches!(console.execute(Command::Quit), Reply::Quit));
    }
}
