//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};

use idshift_common::HostPaths;

use crate::idmap::{self, IdmapEntry, IdmapSet, ShiftDirection};
use crate::shift::{HostFs, Shifter, VFS3_FSCAPS};

/// idshift - UID/GID maps for rootless containers
#[derive(Parser)]
#[command(name = "idshift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding uid_map and gid_map
    #[arg(long, global = true, env = "IDSHIFT_PROC_DIR", default_value = "/proc/self")]
    pub proc_dir: PathBuf,

    /// Directory holding subuid and subgid
    #[arg(long, global = true, env = "IDSHIFT_ETC_DIR", default_value = "/etc")]
    pub etc_dir: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Helper commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show the default map for unprivileged containers
    Map {
        /// Read subuid/subgid below this root filesystem
        #[arg(long, default_value = "")]
        rootfs: String,

        /// User to look up (default: current user)
        #[arg(short, long, default_value = "")]
        user: String,

        /// Print JSON instead of lxc lines
        #[arg(long)]
        json: bool,
    },

    /// Show the map of the current user namespace
    Kernel {
        /// Print JSON instead of lxc lines
        #[arg(long)]
        json: bool,
    },

    /// Merge entries into one map, splitting overlaps
    Parse {
        /// Entries such as `b:0:100000:65536`
        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// Shift ownership of a tree
    Shift {
        /// Root of the tree
        dir: PathBuf,

        /// Map entries such as `b:0:100000:65536`
        #[arg(short, long = "map", required = true)]
        map: Vec<String>,

        /// Shift out of the namespace instead of into it
        #[arg(long)]
        reverse: bool,

        /// Only report what would change
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_set(set: &IdmapSet, json: bool) -> Result<()> {
    if json {
        println!("{}", set.to_json()?);
    } else {
        for line in set.to_lxc_strings() {
            println!("{line}");
        }
    }
    Ok(())
}

fn merge_entries(entries: &[String]) -> Result<IdmapSet> {
    let mut set = IdmapSet::new();
    for text in entries {
        let entry: IdmapEntry = text.parse()?;
        set.add_safe(entry)?;
    }
    Ok(set)
}

impl Cli {
    /// Execute the CLI command.
    pub fn execute(self) -> Result<()> {
        let paths = HostPaths::with_dirs(&self.proc_dir, &self.etc_dir);

        match self.command {
            Commands::Map { rootfs, user, json } => {
                let set = idmap::default_idmap_set_with(&paths, &rootfs, &user)?;
                let usable = idmap::current_idmap_set_with(&paths)
                    .and_then(|kernel| set.usable_in(&kernel.valid_ranges()));
                if let Err(err) = &usable {
                    tracing::warn!(error = %err, "Default map is unusable here");
                }

                if set.is_empty() || usable.is_err() {
                    println!("Only privileged containers will be able to run");
                    return Ok(());
                }
                print_set(&set, json)
            }

            Commands::Kernel { json } => {
                let set = idmap::current_idmap_set_with(&paths)?;
                print_set(&set, json)?;
                if !json {
                    for range in set.valid_ranges() {
                        let class = if range.is_uid { "uid" } else { "gid" };
                        println!("valid {class} range {}-{}", range.start_id, range.end_id);
                    }
                }
                Ok(())
            }

            Commands::Parse { entries } => {
                let set = merge_entries(&entries)?;
                print_set(&set, false)?;
                print_set(&set, true)
            }

            Commands::Shift {
                dir,
                map,
                reverse,
                dry_run,
            } => {
                let set = merge_entries(&map)?;
                if set.is_empty() {
                    return Err(eyre!("No map entries given"));
                }

                let direction = if reverse {
                    ShiftDirection::FromNs
                } else {
                    ShiftDirection::IntoNs
                };

                let records = Shifter::new(&set, &HostFs, &VFS3_FSCAPS).run(&dir, direction, dry_run, None)?;

                if dry_run {
                    for record in &records {
                        println!(
                            "would shift {} to {} {}",
                            record.path.display(),
                            record.new_uid,
                            record.new_gid
                        );
                    }
                } else {
                    println!("Shifted {} paths {direction} {}", records.len(), dir.display());
                }
                Ok(())
            }
        }
    }
}
