//! Print the features of an AVIF file without decoding it.
use std::env;
use std::fs;
use std::process;

fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: probe <file.avif>");
        process::exit(2);
    });
    let bytes = fs::read(&path).expect("Failed to read file");

    match avif_probe::probe(&bytes) {
        Ok(features) => {
            println!(
                "{path}: {}x{}, {} bits per channel, {} channels",
                features.width, features.height, features.bit_depth, features.num_channels
            );
        }
        Err(err) => {
            eprintln!("{path}: {err}");
            process::exit(1);
        }
    }
}
