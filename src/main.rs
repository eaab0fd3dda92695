use std::env;
use std::io::{self, Write};
use std::process::exit;

use simplefs::dirs::DirEntryInfo;
use simplefs::disk::{BlockDisk, Disk};
use simplefs::fs::{FileSystem, FsError};

fn prompt(message: &str) -> String {
    print!("{}", message);
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).ok();
    line.trim().to_string()
}

fn print_listing(entries: &[DirEntryInfo]) {
    println!("   inum    |       name       | type");
    for entry in entries {
        println!(
            "{:<10} | {:<16} | {:<5}",
            entry.inum, entry.name, entry.kind
        );
    }
}

fn print_help() {
    println!("Commands are:");
    println!("    format");
    println!("    mount");
    println!("    debug");
    println!("    password <set|change|remove>");
    println!("    mkdir <dirname>");
    println!("    rmdir <dirname>");
    println!("    cd <dirname>");
    println!("    ls [dirname]");
    println!("    stat");
    println!("    touch <filename>");
    println!("    rm <name>");
    println!("    copyin <path> <filename>");
    println!("    copyout <filename> <path>");
    println!("    help");
    println!("    quit");
    println!("    exit");
}

fn reopen(path: &str, num_blocks: usize) -> BlockDisk {
    match BlockDisk::open(path, num_blocks) {
        Ok(disk) => disk,
        Err(e) => {
            eprintln!("Unable to reopen disk {}: {}", path, e);
            exit(1);
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <diskfile> <nblocks>", args[0]);
        exit(1);
    }
    let image_path = &args[1];
    let num_blocks: usize = match args[2].parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Usage: {} <diskfile> <nblocks>", args[0]);
            exit(1);
        }
    };

    let mut disk: Option<BlockDisk> = match BlockDisk::open(image_path, num_blocks) {
        Ok(d) => Some(d),
        Err(e) => {
            eprintln!("Unable to open disk {}: {}", image_path, e);
            exit(1);
        }
    };
    let mut fs: Option<FileSystem<BlockDisk>> = None;

    loop {
        eprint!("sfs> ");
        io::stderr().flush().ok();

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let mut words = line.split_whitespace();
        let cmd = match words.next() {
            Some(c) => c,
            None => continue,
        };
        let arg1 = words.next();
        let arg2 = words.next();
        let extra = words.next();

        match cmd {
            "format" => {
                if arg1.is_some() {
                    println!("Usage: format");
                    continue;
                }
                if fs.is_some() {
                    println!("format failed: {}", FsError::Busy);
                    continue;
                }
                match disk.as_mut() {
                    Some(d) => match FileSystem::format(d) {
                        Ok(()) => println!("disk formatted."),
                        Err(e) => println!("format failed: {}", e),
                    },
                    None => println!("format failed: {}", FsError::Busy),
                }
            }

            "mount" => {
                if arg1.is_some() {
                    println!("Usage: mount");
                    continue;
                }
                if fs.is_some() {
                    println!("mount failed: {}", FsError::Busy);
                    continue;
                }
                let mut d = match disk.take() {
                    Some(d) => d,
                    None => {
                        println!("mount failed: {}", FsError::Busy);
                        continue;
                    }
                };
                let password = match FileSystem::is_protected(&mut d) {
                    Ok(true) => Some(prompt("Enter password: ")),
                    Ok(false) => None,
                    Err(e) => {
                        println!("mount failed: {}", e);
                        disk = Some(d);
                        continue;
                    }
                };
                match FileSystem::mount(d, password.as_deref()) {
                    Ok(volume) => {
                        println!("disk mounted.");
                        fs = Some(volume);
                    }
                    Err(e) => {
                        println!("mount failed: {}", e);
                        disk = Some(reopen(image_path, num_blocks));
                    }
                }
            }

            "debug" => {
                if arg1.is_some() {
                    println!("Usage: debug");
                    continue;
                }
                if let Some(volume) = fs.as_mut() {
                    match volume.debug_report() {
                        Ok(report) => print!("{}", report),
                        Err(e) => println!("debug failed: {}", e),
                    }
                } else if let Some(d) = disk.as_mut() {
                    let password = match FileSystem::is_protected(d) {
                        Ok(true) => Some(prompt("Enter password: ")),
                        Ok(false) => None,
                        Err(e) => {
                            println!("debug failed: {}", e);
                            continue;
                        }
                    };
                    match FileSystem::debug(d, password.as_deref()) {
                        Ok(report) => print!("{}", report),
                        Err(e) => println!("debug failed: {}", e),
                    }
                }
            }

            "password" => {
                let action = match (arg1, arg2) {
                    (Some(a), None) => a,
                    _ => {
                        println!("Usage: password <set|change|remove>");
                        continue;
                    }
                };
                let volume = match fs.as_mut() {
                    Some(v) => v,
                    None => {
                        println!("password {} failed: {}", action, FsError::NotMounted);
                        continue;
                    }
                };
                let result = match action {
                    "set" | "change" => {
                        let current = if volume.protected() {
                            Some(prompt("Enter current password: "))
                        } else {
                            None
                        };
                        let new = prompt("Enter new password: ");
                        volume
                            .set_password(current.as_deref(), &new)
                            .map(|()| println!("New password set."))
                    }
                    "remove" => {
                        let current = prompt("Enter old password: ");
                        volume
                            .remove_password(&current)
                            .map(|()| println!("Password removed successfully."))
                    }
                    _ => {
                        println!("Usage: password <set|change|remove>");
                        continue;
                    }
                };
                if let Err(e) = result {
                    println!("password {} failed: {}", action, e);
                }
            }

            "mkdir" | "rmdir" | "cd" | "touch" | "rm" => {
                let name = match (arg1, arg2) {
                    (Some(n), None) => n,
                    _ => {
                        println!("Usage: {} <name>", cmd);
                        continue;
                    }
                };
                let volume = match fs.as_mut() {
                    Some(v) => v,
                    None => {
                        println!("{} failed: {}", cmd, FsError::NotMounted);
                        continue;
                    }
                };
                let result = match cmd {
                    "mkdir" => volume.mkdir(name),
                    "rmdir" => volume.rmdir(name),
                    "cd" => volume.cd(name),
                    "touch" => volume.touch(name),
                    _ => volume.rm(name),
                };
                if let Err(e) = result {
                    println!("{} failed: {}", cmd, e);
                }
            }

            "ls" => {
                if arg2.is_some() {
                    println!("Usage: ls [dirname]");
                    continue;
                }
                let volume = match fs.as_mut() {
                    Some(v) => v,
                    None => {
                        println!("ls failed: {}", FsError::NotMounted);
                        continue;
                    }
                };
                let result = match arg1 {
                    Some(name) => volume.ls_dir(name),
                    None => volume.ls(),
                };
                match result {
                    Ok(entries) => print_listing(&entries),
                    Err(e) => println!("ls failed: {}", e),
                }
            }

            "stat" => {
                if arg1.is_some() {
                    println!("Usage: stat");
                    continue;
                }
                match fs.as_mut() {
                    Some(volume) => match volume.stat_report() {
                        Ok(report) => print!("{}", report),
                        Err(e) => println!("stat failed: {}", e),
                    },
                    None => println!("stat failed: {}", FsError::NotMounted),
                }
            }

            "copyin" | "copyout" => {
                let (first, second) = match (arg1, arg2, extra) {
                    (Some(a), Some(b), None) => (a, b),
                    _ => {
                        if cmd == "copyin" {
                            println!("Usage: copyin <path> <filename>");
                        } else {
                            println!("Usage: copyout <filename> <path>");
                        }
                        continue;
                    }
                };
                let volume = match fs.as_mut() {
                    Some(v) => v,
                    None => {
                        println!("{} failed: {}", cmd, FsError::NotMounted);
                        continue;
                    }
                };
                let result = if cmd == "copyin" {
                    volume.copyin(first, second)
                } else {
                    volume.copyout(first, second)
                };
                match result {
                    Ok(bytes) => println!("{} bytes copied", bytes),
                    Err(e) => println!("{} failed: {}", cmd, e),
                }
            }

            "help" => print_help(),

            "exit" | "quit" => {
                if let Some(volume) = fs.take() {
                    volume.exit();
                }
                break;
            }

            _ => {
                println!("Unknown command: {}", line.trim_end());
                println!("Type 'help' for a list of commands.");
            }
        }
    }

    exit(0);
}
