//! This is the main entry point of the disk forensics tool.
//!
//! The program provides an interactive command-line interface for analyzing disk images
//! and drives: open a device, print its layout, browse FAT/exFAT directories, extract
//! files and inspect the NTFS system files.

use disk_forensics::commands::Command;
use disk_forensics::device::BlockDevice;
use disk_forensics::filesystem::dir_entry::DirEntry;
use disk_forensics::filesystem::{DirRef, ScanOptions};
use disk_forensics::traits::ProgressSink;
use disk_forensics::{Disk, DiskImage, PhysicalDrive};
use log::{LevelFilter, error, info, trace, warn};
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    rc::Rc,
};

type Device = Box<dyn BlockDevice>;

/// Represents the runtime state of the program.
struct RunState {
    /// The currently opened disk.
    disk: Option<Disk<Device>>,
    /// Selected volume, 0-based.
    vol: usize,
    /// Options applied to the disk and its volumes.
    options: ScanOptions,
    /// Entries of the last directory listed, used by `cat`.
    listing: Vec<DirEntry>,
}

const DEFAULT_VERBOSITY: usize = 2;

fn main() {
    stderrlog::new()
        .module(module_path!())
        .module("disk_forensics")
        .verbosity(4)
        .init()
        .unwrap();
    set_verbosity(DEFAULT_VERBOSITY);

    let mut run_state = RunState {
        disk: None,
        vol: 0,
        options: ScanOptions::default(),
        listing: vec![],
    };

    loop {
        print!("> ");
        io::stdout().flush().unwrap();

        let mut s = String::new();
        let n = io::stdin()
            .read_line(&mut s)
            .expect("Failed to read command");
        if n == 0 {
            break;
        }

        match Command::from_string(&s) {
            Command::Quit => break,
            Command::Open(path) => match open_disk(Path::new(&path), run_state.options) {
                Ok(disk) => {
                    run_state.disk = Some(disk);
                    run_state.vol = 0;
                    run_state.listing.clear();
                }
                Err(err) => error!("{err}"),
            },
            Command::Print => match &run_state.disk {
                Some(disk) => {
                    if let Err(e) = disk.print_layout(3) {
                        error!("Print layout error: {e}");
                    }
                }
                None => warn!("Open disk image first"),
            },
            Command::Partition(vol_nb) => match &run_state.disk {
                Some(disk) if vol_nb <= disk.volumes().len() => {
                    run_state.vol = vol_nb - 1;
                    run_state.listing.clear();
                    info!("Partition #{vol_nb} selected ({})", disk.volumes()[vol_nb - 1].fs_type());
                }
                Some(disk) => error!(
                    "Invalid volume number. There are {} volumes on disk.",
                    disk.volumes().len()
                ),
                None => warn!("Open disk image first"),
            },
            Command::Ls(cluster) => list(&mut run_state, cluster),
            Command::Tree => with_disk(&mut run_state, |disk, vol| {
                print!("{}", disk.tree(vol)?);
                Ok(())
            }),
            Command::Cat(index, path) => extract(&mut run_state, index, Path::new(&path)),
            Command::Fat => with_disk(&mut run_state, |disk, vol| {
                for (n, value) in disk.fat_dump(vol)?.iter().enumerate() {
                    println!("{n:>8}: 0x{value:08X}");
                }
                Ok(())
            }),
            Command::Systab => with_disk(&mut run_state, |disk, vol| {
                for file in disk.system_table(vol)? {
                    println!("{file}");
                }
                Ok(())
            }),
            Command::Deleted => {
                run_state.options.include_deleted = !run_state.options.include_deleted;
                if let Some(disk) = run_state.disk.as_mut() {
                    disk.set_options(run_state.options);
                }
                info!(
                    "Deleted entries {}",
                    if run_state.options.include_deleted { "shown" } else { "hidden" }
                );
            }
            Command::Verbose(level) => set_verbosity(level),
            Command::Unknown(s) => error!("Unknown command: {s:?}"),
            Command::Invalid(s) => error!("{s}"),
            Command::Empty => {}
        }
    }
}

fn set_verbosity(level: usize) {
    let filter = match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    log::set_max_level(filter);
}

/// Opens a physical drive for device paths, an image file otherwise.
fn open_disk(path: &Path, options: ScanOptions) -> Result<Disk<Device>, Box<dyn std::error::Error>> {
    let name = path.to_string_lossy();
    let device: Device = if name.starts_with("/dev/") || name.starts_with(r"\\.\") {
        Box::new(PhysicalDrive::open(path)?)
    } else {
        Box::new(DiskImage::open(path)?)
    };

    let progress: Rc<dyn ProgressSink> = Rc::new(|percent: u8| trace!("Progress: {percent}%"));
    Ok(Disk::open(device, options, progress)?)
}

fn with_disk<F>(run_state: &mut RunState, f: F)
where
    F: FnOnce(&mut Disk<Device>, usize) -> Result<(), disk_forensics::partition::disk_error::DiskError>,
{
    match run_state.disk.as_mut() {
        Some(disk) => {
            if let Err(err) = f(disk, run_state.vol) {
                error!("{err}");
            }
        }
        None => warn!("Open disk image first"),
    }
}

fn list(run_state: &mut RunState, cluster: Option<u32>) {
    let Some(disk) = run_state.disk.as_mut() else {
        warn!("Open disk image first");
        return;
    };

    // A directory from the last listing keeps its exFAT allocation flags.
    let known = cluster.and_then(|cluster| {
        run_state
            .listing
            .iter()
            .find(|e| e.is_dir() && e.start_cluster() == cluster)
            .cloned()
    });
    let listing = match (&known, cluster) {
        (Some(entry), _) => disk.list_entry(run_state.vol, entry),
        (None, Some(cluster)) => disk.list_dir(run_state.vol, DirRef::from(cluster)),
        (None, None) => disk.list_dir(run_state.vol, DirRef::Root),
    };
    let mut entries = match listing {
        Ok(entries) => entries,
        Err(err) => {
            error!("{err}");
            return;
        }
    };

    let mut found = vec![];
    for entry in entries.by_ref() {
        match entry {
            Ok(entry) => {
                println!("{entry}");
                found.push(entry);
            }
            Err(err) => {
                error!("{err}");
                break;
            }
        }
    }
    if let Some(stop) = entries.truncation() {
        warn!("Listing incomplete: {stop}");
    }
    drop(entries);
    run_state.listing = found;
}

fn extract(run_state: &mut RunState, index: usize, path: &Path) {
    let Some(disk) = run_state.disk.as_mut() else {
        warn!("Open disk image first");
        return;
    };
    let Some(entry) = run_state.listing.iter().find(|e| e.index() == index) else {
        error!("No entry #{index} in the last listing, run 'ls' first");
        return;
    };

    let mut file = match File::create(path) {
        Ok(file) => file,
        Err(e) => {
            error!("Can't create {}: {e}", path.display());
            return;
        }
    };
    match disk.read_file(run_state.vol, entry, &mut file) {
        Ok(n) => println!("{n} bytes written to {}", path.display()),
        Err(err) => error!("Extraction failed: {err}"),
    }
}
