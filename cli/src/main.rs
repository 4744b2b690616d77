extern crate clap;
extern crate disktree;
extern crate failure;
#[macro_use]
extern crate failure_derive;

mod errors;

use self::errors::CliError;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use disktree::external::ReinitializePrompt;
use disktree::{Device, DeviceTree, FileSystem, Format, LevelFilter, Operation, TreeConfig};
use std::io::{self, BufRead, Write};
use std::process::exit;

fn main() {
    let matches = App::new("disktree")
        .about("inspects block devices and plans changes to them")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("exclusive")
                .short("x")
                .long("exclusive")
                .help("only scan the specified disks")
                .takes_value(true)
                .multiple(true)
                .global(true),
        )
        .arg(
            Arg::with_name("ignore")
                .short("i")
                .long("ignore")
                .help("skip the specified disks while scanning")
                .takes_value(true)
                .multiple(true)
                .global(true),
        )
        .arg(
            Arg::with_name("protect")
                .short("p")
                .long("protect")
                .help("devices (by name, UUID=, or LABEL=) that must never be reinitialized")
                .takes_value(true)
                .multiple(true)
                .global(true),
        )
        .arg(
            Arg::with_name("initlabel")
                .long("initlabel")
                .help("reinitialize disks with unusable disklabels without asking")
                .global(true),
        )
        .arg(
            Arg::with_name("zero-mbr")
                .long("zero-mbr")
                .help("reinitialize disks that carry no disklabel without asking")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("print debug messages")
                .global(true),
        )
        .subcommand(SubCommand::with_name("list").about("list the devices that were discovered"))
        .subcommand(
            SubCommand::with_name("plan")
                .about("print the operations that would be executed")
                .arg(
                    Arg::with_name("destroy")
                        .short("d")
                        .long("destroy")
                        .help("destroy the specified devices")
                        .takes_value(true)
                        .multiple(true),
                )
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .help("format a device: DEVICE:FS[:MOUNTPOINT]")
                        .takes_value(true)
                        .multiple(true),
                )
                .arg(
                    Arg::with_name("resize")
                        .short("r")
                        .long("resize")
                        .help("resize a device: DEVICE:MIB")
                        .takes_value(true)
                        .multiple(true),
                )
                .arg(
                    Arg::with_name("execute")
                        .long("execute")
                        .help("execute the plan instead of only printing it"),
                ),
        )
        .get_matches();

    let options = matches.subcommand().1.unwrap_or(&matches);
    let level = if options.is_present("verbose") { LevelFilter::Debug } else { LevelFilter::Warn };
    if let Err(err) = disktree::log_with_level(level, |_level, _message| {}) {
        eprintln!("failed to initialize logging: {}", err);
    }

    let result = populate(options).and_then(|mut tree| match matches.subcommand() {
        ("list", _) => {
            list(&tree);
            Ok(())
        }
        ("plan", Some(plan)) => schedule(&mut tree, plan),
        _ => Ok(()),
    });

    if let Err(why) = result {
        eprintln!("disktree: {}", why);
        exit(1);
    }
}

fn values<'a>(matches: &'a ArgMatches, name: &str) -> Vec<&'a str> {
    matches.values_of(name).map(|values| values.collect()).unwrap_or_default()
}

fn populate(matches: &ArgMatches) -> Result<DeviceTree, CliError> {
    let mut config = TreeConfig::default()
        .reinitialize(matches.is_present("initlabel"))
        .zero_mbr(matches.is_present("zero-mbr"));

    for disk in values(matches, "exclusive") {
        config = config.exclusive(disk);
    }

    for disk in values(matches, "ignore") {
        config = config.ignore(disk);
    }

    for spec in values(matches, "protect") {
        config = config.protect(spec);
    }

    let mut tree = DeviceTree::system(config).with_confirmation(confirm);
    tree.populate()?;
    Ok(tree)
}

fn confirm(prompt: &ReinitializePrompt) -> bool {
    eprint!(
        "{} ({}) has no usable disklabel. {} Reinitialize it? [y/N] ",
        prompt.path, prompt.description, prompt.details
    );
    let _ = io::stderr().flush();

    let mut answer = String::new();
    let stdin = io::stdin();
    if stdin.lock().read_line(&mut answer).is_err() {
        return false;
    }

    answer.trim().eq_ignore_ascii_case("y")
}

fn list(tree: &DeviceTree) {
    let devices = match tree.devices() {
        Ok(devices) => devices,
        Err(why) => {
            eprintln!("disktree: {}", why);
            return;
        }
    };

    for device in devices {
        let format = device.format.type_name().unwrap_or("-");
        let mountpoint = device.format.mountpoint().unwrap_or("");
        println!(
            "{:<16} {:<10} {:>10} MiB  {:<10} {}",
            device.name,
            device.type_name(),
            device.size / (1024 * 1024),
            format,
            mountpoint
        );
    }

    for disk in tree.ignored_disks() {
        println!("{:<16} ignored", disk);
    }
}

fn find(tree: &DeviceTree, name: &str) -> Result<Device, CliError> {
    tree.by_name(name.trim_start_matches("/dev/"))
        .or_else(|| tree.by_path(name))
        .cloned()
        .ok_or_else(|| CliError::DeviceNotFound { device: name.into() })
}

fn schedule(tree: &mut DeviceTree, matches: &ArgMatches) -> Result<(), CliError> {
    for name in values(matches, "destroy") {
        let device = find(tree, name)?;
        if !device.format.is_none() {
            tree.register(Operation::destroy_format(device.clone()))?;
        }

        tree.register(Operation::destroy_device(device))?;
    }

    for arg in values(matches, "format") {
        let mut fields = arg.split(':');
        let (name, fs) = match (fields.next(), fields.next()) {
            (Some(name), Some(fs)) => (name, fs),
            _ => return Err(CliError::FormatArgs { arg: arg.into() }),
        };

        let device = find(tree, name)?;
        let fs = fs.parse::<FileSystem>().map_err(|_| CliError::InvalidFileSystem { fs: fs.into() })?;
        let mut format = Format::filesystem(fs, &device.path);
        if let Some(mountpoint) = fields.next() {
            format = format.with_mountpoint(mountpoint);
        }

        if !device.format.is_none() {
            tree.register(Operation::destroy_format(device.clone()))?;
        }

        tree.register(Operation::create_format(device, format))?;
    }

    for arg in values(matches, "resize") {
        let mut fields = arg.split(':');
        let (name, size) = match (fields.next(), fields.next()) {
            (Some(name), Some(size)) => (name, size),
            _ => return Err(CliError::ResizeArgs { arg: arg.into() }),
        };

        let device = find(tree, name)?;
        let mib = size.parse::<u64>().map_err(|_| CliError::ArgNaN { arg: size.into() })?;
        tree.register(Operation::resize_device(device, mib * 1024 * 1024))?;
    }

    let execute = matches.is_present("execute");
    tree.commit(!execute)?;

    if execute {
        println!("all operations executed");
    } else {
        for operation in tree.operations() {
            println!("{}", operation);
        }
    }

    Ok(())
}
