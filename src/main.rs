//! midiplay CLI: play a MIDI file to an output port.
//!
//! Usage:
//!   midiplay --list
//!   midiplay path/to/file.mid [--port NAME] [--speed F] [--loop] [--policy interrupt|hold|split]
//!
//! Set `RUST_LOG=debug` to see engine state transitions.

use std::io::Write;
use std::time::Duration;
use std::{env, process, thread};

use env_logger::Env;
use log::error;
use mp_master::{Controller, MidirOutput, NoteStopPolicy};

const USAGE: &str =
    "Usage: midiplay <file.mid> [--port NAME] [--speed F] [--loop] [--policy interrupt|hold|split]\n       midiplay --list";

const STATUS_INTERVAL: Duration = Duration::from_millis(100);

struct Options {
    path: String,
    port: String,
    speed: f64,
    looping: bool,
    policy: NoteStopPolicy,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--list") {
        list_ports();
        return;
    }

    let options = parse_args(&args).unwrap_or_else(|msg| {
        eprintln!("{}\n{}", msg, USAGE);
        process::exit(1);
    });

    let mut ctrl = Controller::open(&options.port).unwrap_or_else(|e| {
        error!("Failed to open output port: {}", e);
        process::exit(1);
    });

    let configured = ctrl
        .set_speed(options.speed)
        .and_then(|_| ctrl.set_loop(options.looping))
        .and_then(|_| ctrl.set_note_stop_policy(options.policy))
        .and_then(|_| ctrl.load_file(&options.path));
    if let Err(e) = configured {
        error!("{}", e);
        process::exit(1);
    }

    let total = ctrl.duration().unwrap_or_default();
    println!("File:     {}", options.path);
    println!("Length:   {:.1}s", total.as_secs_f64());
    println!("Speed:    {}x", options.speed);
    println!("Loop:     {}", if options.looping { "on" } else { "off" });
    println!("Policy:   {}", options.policy);
    println!();

    play(&ctrl);
}

fn play(ctrl: &Controller<MidirOutput>) {
    if let Err(e) = ctrl.start() {
        error!("Failed to start playback: {}", e);
        process::exit(1);
    }

    while ctrl.is_running() {
        if let Some(pos) = ctrl.position() {
            print!("\rPosition: {:>8.2}s", pos.as_secs_f64());
            let _ = std::io::stdout().flush();
        }
        thread::sleep(STATUS_INTERVAL);
    }

    if let Some(e) = ctrl.playback().and_then(|p| p.take_error()) {
        println!();
        error!("Playback stopped: {}", e);
        process::exit(1);
    }
    println!("\rDone.                ");
}

fn list_ports() {
    match MidirOutput::list_ports() {
        Ok(ports) if ports.is_empty() => println!("No MIDI output ports found."),
        Ok(ports) => {
            for (i, name) in ports.iter().enumerate() {
                println!("{:>2}: {}", i, name);
            }
        }
        Err(e) => {
            error!("Failed to list ports: {}", e);
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut path = None;
    let mut options = Options {
        path: String::new(),
        port: String::new(),
        speed: 1.0,
        looping: false,
        policy: NoteStopPolicy::default(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--port" => options.port = value(&mut iter, "--port")?.to_string(),
            "--speed" => {
                let raw = value(&mut iter, "--speed")?;
                options.speed = raw
                    .parse()
                    .map_err(|_| format!("Invalid speed '{}'", raw))?;
            }
            "--loop" => options.looping = true,
            "--policy" => {
                options.policy = value(&mut iter, "--policy")?
                    .parse()
                    .map_err(|e| format!("{}", e))?;
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown option '{}'", flag)),
            file => path = Some(file.to_string()),
        }
    }

    options.path = path.ok_or("Missing MIDI file")?;
    Ok(options)
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str, String> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| format!("{} needs a value", flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_all_options() {
        let opts = parse_args(&args(&[
            "song.mid", "--port", "loopMIDI", "--speed", "1.5", "--loop", "--policy", "split",
        ]))
        .unwrap();
        assert_eq!(opts.path, "song.mid");
        assert_eq!(opts.port, "loopMIDI");
        assert_eq!(opts.speed, 1.5);
        assert!(opts.looping);
        assert_eq!(opts.policy, NoteStopPolicy::Split);
    }

    #[test]
    fn defaults_apply() {
        let opts = parse_args(&args(&["song.mid"])).unwrap();
        assert_eq!(opts.port, "");
        assert_eq!(opts.speed, 1.0);
        assert!(!opts.looping);
        assert_eq!(opts.policy, NoteStopPolicy::Interrupt);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["a.mid", "--speed"])).is_err());
        assert!(parse_args(&args(&["a.mid", "--speed", "fast"])).is_err());
        assert!(parse_args(&args(&["a.mid", "--policy", "legato"])).is_err());
        assert!(parse_args(&args(&["a.mid", "--verbose"])).is_err());
    }
}
