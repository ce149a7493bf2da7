//! # devbridge CLI
//!
//! Command-line utilities for building, parsing and matching device topics.

use anyhow::{bail, Context, Result};
use devbridge_proto::topics;
use devbridge_proto::topic_match;
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "match" => {
            let [pattern, topic] = &args[2..] else {
                eprintln!("Usage: devbridge match <pattern> <topic>");
                std::process::exit(1);
            };
            let matched = topic_match(pattern, topic);
            println!("{matched}");
            if !matched {
                std::process::exit(2);
            }
        }
        "parse" => {
            let [topic] = &args[2..] else {
                eprintln!("Usage: devbridge parse <topic>");
                std::process::exit(1);
            };
            let Some(parsed) = topics::parse(topic) else {
                bail!("not a device topic: {topic}");
            };
            let json = serde_json::to_string_pretty(&parsed).context("Failed to encode")?;
            println!("{json}");
        }
        "topic" => {
            let Some(device) = args.get(2) else {
                eprintln!("Usage: devbridge topic <device> [control] [suffix...]");
                std::process::exit(1);
            };
            println!("{}", build_topic(device, &args[3..]));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn build_topic(device: &str, rest: &[String]) -> String {
    let suffix: Vec<&str> = rest.iter().skip(1).map(String::as_str).collect();
    match rest.first() {
        Some(control) => topics::control_topic(device, control, &suffix),
        None => topics::device_name_topic(device),
    }
}

fn print_help() {
    println!(
        r#"devbridge CLI

USAGE:
    devbridge <COMMAND> [OPTIONS]

COMMANDS:
    match <pattern> <topic>            Check whether a subscription pattern matches a topic
    parse <topic>                      Show the device, control and kind of a topic as JSON
    topic <device> [control] [suffix]  Build a device or control topic
    help                               Show this help message

EXAMPLES:
    devbridge match "/devices/+/controls/+" /devices/therm/controls/temp
    devbridge parse /devices/therm/controls/temp/meta/type
    devbridge topic therm temp meta order
"#
    );
}
