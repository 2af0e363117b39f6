//! This module defines the `Command` enum and its associated methods for parsing
//! and handling user commands of the interactive front-end.
//!
//! The `Command` enum represents the commands the user can input, such as
//! opening a device, selecting a partition, listing a directory or extracting a file.

/// Represents a user command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Command to quit the program.
    Quit,
    /// Command to open a disk image or a physical drive, encapsulating its path.
    Open(String),
    /// Command to print the partition table and the volume layouts.
    Print,
    /// Select the partition to analyse, numbered from 1.
    Partition(usize),
    /// List the root directory, or the directory starting at the given cluster.
    Ls(Option<u32>),
    /// Print the directory tree of the selected partition.
    Tree,
    /// Extract the entry with the given listing index into a file.
    Cat(usize, String),
    /// Dump the allocation table of the selected partition.
    Fat,
    /// Print the NTFS system file table of the selected partition.
    Systab,
    /// Toggle the listing of deleted entries.
    Deleted,
    /// Set the log verbosity.
    Verbose(usize),
    /// Command for an unknown input, encapsulating the raw input as a `String`.
    Unknown(String),
    /// Command for invalid input, encapsulating an error message as a `String`.
    Invalid(String),
    /// Command for an empty input.
    Empty,
}

impl Command {
    /// Parses a string into a `Command` instance.
    ///
    /// # Parameters
    /// - `s`: A string slice representing the user input.
    ///
    /// # Returns
    /// - The matching command, with its arguments parsed.
    /// - `Command::Unknown` if the input does not match any known command.
    /// - `Command::Invalid` if an argument is missing or malformed.
    /// - `Command::Empty` if the input is empty or contains only whitespace.
    pub fn from_string(s: &str) -> Self {
        let mut parts = s.split_whitespace();
        match parts.next() {
            Some("quit") => Command::Quit,
            Some("open") => match parts.next() {
                Some(arg) => Command::Open(arg.to_string()),
                None => Command::Invalid(String::from(
                    "Missing arg: 'open' expects the path to an image file or a drive.",
                )),
            },
            Some("print") => Command::Print,
            Some("part") => match parts.next().map(str::parse::<usize>) {
                Some(Ok(nb)) if nb > 0 => Command::Partition(nb),
                Some(_) => Command::Invalid(String::from(
                    "Arg parsing error: 'part' expects a partition number starting at 1.",
                )),
                None => Command::Invalid(String::from(
                    "Missing arg: 'part' expects the partition number.",
                )),
            },
            Some("ls") => match parts.next().map(parse_cluster) {
                None => Command::Ls(None),
                Some(Some(cluster)) => Command::Ls(Some(cluster)),
                Some(None) => Command::Invalid(String::from(
                    "Arg parsing error: 'ls' expects a cluster number (decimal or 0x-prefixed).",
                )),
            },
            Some("tree") => Command::Tree,
            Some("cat") => match (parts.next().map(str::parse::<usize>), parts.next()) {
                (Some(Ok(index)), Some(path)) => Command::Cat(index, path.to_string()),
                (Some(Err(_)), _) => Command::Invalid(String::from(
                    "Arg parsing error: 'cat' expects the listing index of an entry.",
                )),
                _ => Command::Invalid(String::from(
                    "Missing arg: 'cat' expects an entry index and an output file.",
                )),
            },
            Some("fat") => Command::Fat,
            Some("systab") => Command::Systab,
            Some("deleted") => Command::Deleted,
            Some("verbose") => match parts.next().map(str::parse::<usize>) {
                Some(Ok(level)) if level <= 4 => Command::Verbose(level),
                _ => Command::Invalid(String::from(
                    "Arg parsing error: 'verbose' expects a level between 0 and 4.",
                )),
            },
            Some(other) => Command::Unknown(other.to_string()),
            None => Command::Empty,
        }
    }
}

fn parse_cluster(arg: &str) -> Option<u32> {
    match arg.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => arg.parse().ok(),
    }
}
