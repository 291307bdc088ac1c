//! Command-line front end for tagging Authenticode-signed binaries.
//!
//! Reads a signed PE32 or MSI file, performs any requested tag operations,
//! and writes the updated binary (in place unless `--out` is given).

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use log::debug;

use certificate_tag::{find_tag, Binary, TagError, TagResult};

#[derive(Parser)]
#[command(name = "certificate-tag")]
#[command(about = "Manipulates tags in Authenticode-signed PE32 and MSI binaries")]
#[command(version)]
struct Cli {
    /// Dump any appended tag to stdout
    #[arg(long)]
    dump_appended_tag: bool,

    /// Remove any appended tag and rewrite the binary
    #[arg(long)]
    remove_appended_tag: bool,

    /// Set the appended tag to the contents of this file and rewrite the binary
    #[arg(long, value_name = "FILE")]
    load_appended_tag: Option<PathBuf>,

    /// Set a superfluous certificate tag with this value and rewrite the
    /// binary; values beginning with "0x" are interpreted as hex
    #[arg(long, value_name = "STRING")]
    set_superfluous_cert_tag: Option<String>,

    /// Pad the superfluous cert tag with zeros to at least this many bytes
    #[arg(long, value_name = "N", default_value_t = 0)]
    padded_length: usize,

    /// Write the PKCS#7 data from the original binary to this file
    #[arg(long, value_name = "FILE")]
    save_pkcs7: Option<PathBuf>,

    /// Write the updated binary to this file instead of updating in place
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Print the location and size of the superfluous cert's tag buffer
    #[arg(long)]
    print_tag_details: bool,

    /// The signed binary to operate on
    #[arg(value_name = "BINARY")]
    binary: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let Some(input) = cli.binary.clone() else {
        eprintln!("Usage: certificate-tag [flags] binary.exe");
        process::exit(255);
    };

    if let Err(err) = run(&cli, &input) {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn run(cli: &Cli, input: &Path) -> TagResult<()> {
    let out_path = cli.out.clone().unwrap_or_else(|| input.to_path_buf());
    let contents = fs::read(input)?;
    let mut bin = Binary::parse(&contents)?;

    let mut final_contents: Option<Vec<u8>> = None;
    let mut did_something = false;

    if let Some(path) = &cli.save_pkcs7 {
        debug!("writing {} bytes of PKCS#7 data to {}", bin.asn1_data().len(), path.display());
        fs::write(path, bin.asn1_data())?;
        did_something = true;
    }

    if cli.dump_appended_tag {
        match bin.appended_tag() {
            None => eprintln!("No appended tag found"),
            Some(tag) => print!("{}", hex_dump(tag)),
        }
        did_something = true;
    }

    if cli.remove_appended_tag {
        let updated = bin.remove_appended_tag()?;
        fs::write(&out_path, &updated)?;
        final_contents = Some(updated);
        did_something = true;
    }

    if let Some(path) = &cli.load_appended_tag {
        let tag_contents = fs::read(path)?;
        debug!("appending {} tag bytes", tag_contents.len());
        let updated = bin.set_appended_tag(&tag_contents)?;
        fs::write(&out_path, &updated)?;
        final_contents = Some(updated);
        did_something = true;
    }

    if let Some(value) = &cli.set_superfluous_cert_tag {
        let mut tag_contents = match value.strip_prefix("0x") {
            Some(hex_value) => match hex::decode(hex_value) {
                Ok(decoded) => decoded,
                Err(err) => {
                    eprintln!("Failed to parse tag contents from command line: {err}");
                    process::exit(1);
                }
            },
            None => value.clone().into_bytes(),
        };
        while tag_contents.len() < cli.padded_length {
            tag_contents.push(0);
        }
        // The tag locator's search string includes a two-byte length field,
        // so the final length must need exactly two bytes to express.
        if tag_contents.len() < 0x100 || tag_contents.len() > 0xffff {
            return Err(TagError::TagLengthOutOfRange(tag_contents.len()));
        }

        debug!("setting superfluous cert tag, {} bytes", tag_contents.len());
        let updated = bin.set_superfluous_cert_tag(&tag_contents)?;
        fs::write(&out_path, &updated)?;
        final_contents = Some(updated);
        did_something = true;
    }

    if cli.print_tag_details {
        let search = match final_contents {
            Some(updated) => updated,
            // Nothing was rewritten; re-read the input, since parsing works
            // on a modified copy.
            None => fs::read(input)?,
        };
        match find_tag(&search, bin.certificate_offset() as usize)? {
            Some(location) => {
                println!("Omaha Tag offset, length: ({}, {})", location.offset, location.length);
            }
            None => println!("Omaha Tag offset, length: (-1, 0)"),
        }
        did_something = true;
    }

    if !did_something {
        // By default, print basic information.
        match bin.appended_tag() {
            None => println!("No appended tag"),
            Some(tag) => println!("Appended tag included, {} bytes", tag.len()),
        }
    }

    Ok(())
}

/// Canonical 16-bytes-per-line hex dump: offset, hex columns split 8+8, and
/// an ASCII gutter with `.` for non-printable bytes.
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", line * 16);
        for column in 0..16 {
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        for &byte in chunk {
            out.push(if (0x20..0x7f).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}
