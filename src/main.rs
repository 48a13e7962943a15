//! `inkflow <image> [paper] [--config settings.json]`
//!
//! Opens a window showing `image`; dragging the pointer across it smears
//! and inks the picture. `--example-config` prints the default settings.

use std::path::PathBuf;

use inkflow::prelude::*;

fn print_usage(program: &str) {
    eprintln!("Usage: {} <image> [paper] [--config settings.json]", program);
    eprintln!();
    eprintln!("Pointer-driven flowmap ink effect over an image.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  image      PNG or JPEG to display");
    eprintln!("  paper      Paper texture (default: generated grain)");
    eprintln!("  --config   JSON settings file, see --example-config");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("inkflow");

    if args.iter().any(|a| a == "--example-config") {
        match serde_json::to_string_pretty(&Settings::default()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing settings: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut positional: Vec<PathBuf> = Vec::new();
    let mut config_path: Option<PathBuf> = None;
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" => match rest.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("--config needs a file path");
                    std::process::exit(1);
                }
            },
            "-h" | "--help" => {
                print_usage(program);
                return;
            }
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let Some(image_path) = positional.first() else {
        print_usage(program);
        std::process::exit(1);
    };

    let settings = match &config_path {
        Some(path) => {
            let json = match std::fs::read_to_string(path) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("Error reading settings file: {}", e);
                    std::process::exit(1);
                }
            };
            match Settings::from_json(&json) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Error parsing settings: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => Settings::default(),
    };

    let image = match TextureConfig::from_file(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error loading image: {}", e);
            std::process::exit(1);
        }
    };

    let mut app = FlowmapApp::new(image)
        .with_title(format!("inkflow - {}", image_path.display()))
        .with_settings(settings);

    if let Some(paper_path) = positional.get(1) {
        match TextureConfig::from_file(paper_path) {
            Ok(paper) => app = app.with_paper(paper.with_address_mode(AddressMode::Repeat)),
            Err(e) => {
                eprintln!("Error loading paper: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = app.run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
