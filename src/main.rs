use clap::{Arg, ArgAction, Command};
use ewf_core::handle::Handle;
use ewf_core::segment;
use std::path::PathBuf;
use std::process::exit;

fn open_segment_set(input: &str) -> Handle {
    let path = PathBuf::from(input);
    let paths = match segment::find_segment_paths(&path) {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("Error: {}", err);
            exit(1);
        }
    };
    match Handle::open(&paths) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Error: {}", err);
            exit(1);
        }
    }
}

fn dump(input: &str, size: usize, offset: u64, verbose: bool) {
    if verbose {
        println!("Processing '{}'...", input);
    }
    let handle = open_segment_set(input);
    if verbose {
        println!("------------------------------------------------------------");
        handle.print_info();
        println!("------------------------------------------------------------");
    }
    let mut buf = vec![0u8; size];
    let n = match handle.read_at(offset, &mut buf) {
        Ok(n) => n,
        Err(err) => {
            eprintln!("Error: {}", err);
            exit(1);
        }
    };
    let result = String::from_utf8_lossy(&buf[..n]);
    println!("{}", result);
}

fn info(input: &str, json: bool) {
    let handle = open_segment_set(input);
    if json {
        match handle.to_json() {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => {
                eprintln!("Error: {}", err);
                exit(1);
            }
        }
    } else {
        handle.print_info();
    }
}

fn main() {
    env_logger::init();

    let matches = Command::new("exhume_body")
        .version(clap::crate_version!())
        .author("ForensicXlab")
        .about("Reads forensic disk-image segment sets (EWF/E01/Lx01/L01).")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("Path to one segment file of the image (siblings are discovered automatically)."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(clap::value_parser!(usize))
                .help("The size (in bytes) to read. Omit with --info to only print acquisition metadata."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(clap::value_parser!(u64))
                .default_value("0")
                .help("Read at a specific media offset."),
        )
        .arg(
            Arg::new("info")
                .long("info")
                .action(ArgAction::SetTrue)
                .help("Print acquisition metadata and exit, ignoring --size/--offset."),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("With --info, render the acquisition summary as JSON instead of logging it."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let input = matches.get_one::<String>("input").unwrap();
    let verbose = matches.get_flag("verbose");

    if matches.get_flag("info") {
        info(input, matches.get_flag("json"));
        return;
    }

    let size = match matches.get_one::<usize>("size") {
        Some(size) => *size,
        None => {
            eprintln!("Error: --size is required unless --info is passed.");
            exit(1);
        }
    };
    let offset = *matches.get_one::<u64>("offset").unwrap();
    dump(input, size, offset, verbose);
}
