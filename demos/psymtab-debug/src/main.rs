//! Maintenance diagnostics for the psymtab indexing core.
//!
//! Loads an ELF object carrying `.stab`/`.stabstr` or `.mdebug` debug
//! info, builds the partial symbol tables, and dumps or checks them the
//! way the debugger's maintenance commands would.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{value_parser, Arg, ArgMatches, Command};
use goblin::elf::Elf;
use regex::Regex;
use scroll::Endian;

use psymtab_core::{ObjectFile, PsymbolFunctions, PsymtabStorage};
use psymtab_mdebug::MdebugInput;
use psymtab_stabs::{NlistFormat, StabsInput};

type Error = Box<dyn std::error::Error>;

fn print_error(mut error: &dyn std::error::Error) {
    eprintln!("Error: {error}");

    while let Some(source) = error.source() {
        eprintln!("   caused by {source}");
        error = source;
    }
}

/// The debug flavor found in the object.
enum DebugSections {
    Stabs {
        symbols: (usize, usize),
        strings: (usize, usize),
    },
    Mdebug {
        hdrr_offset: usize,
    },
}

struct LoadedObject {
    objfile: ObjectFile,
    quick: PsymbolFunctions,
}

fn section_range(elf: &Elf<'_>, name: &str) -> Option<(usize, usize)> {
    elf.section_headers.iter().find_map(|header| {
        (elf.shdr_strtab.get_at(header.sh_name) == Some(name))
            .then(|| (header.sh_offset as usize, header.sh_size as usize))
    })
}

fn section_index(elf: &Elf<'_>, name: &str) -> Option<usize> {
    elf.section_headers
        .iter()
        .position(|header| elf.shdr_strtab.get_at(header.sh_name) == Some(name))
}

fn load_object(path: &PathBuf, buffer: &[u8]) -> Result<LoadedObject, Error> {
    let elf = Elf::parse(buffer)?;
    let endian = if elf.little_endian {
        Endian::Little
    } else {
        Endian::Big
    };

    let mut objfile = ObjectFile::new(path.display().to_string());
    objfile.section_offsets = vec![0; elf.section_headers.len()];
    objfile.sect_index_text = section_index(&elf, ".text");
    objfile.sect_index_data = section_index(&elf, ".data");
    objfile.sect_index_bss = section_index(&elf, ".bss");
    objfile.sect_index_rodata = section_index(&elf, ".rodata");

    let debug = if let (Some(symbols), Some(strings)) = (
        section_range(&elf, ".stab"),
        section_range(&elf, ".stabstr"),
    ) {
        DebugSections::Stabs { symbols, strings }
    } else if let Some((offset, _)) = section_range(&elf, ".mdebug") {
        DebugSections::Mdebug {
            hdrr_offset: offset,
        }
    } else {
        return Err("no .stab/.stabstr or .mdebug sections found".into());
    };

    let (text_addr, text_size) = elf
        .section_headers
        .iter()
        .find(|header| elf.shdr_strtab.get_at(header.sh_name) == Some(".text"))
        .map(|header| (header.sh_addr, header.sh_size))
        .unwrap_or((0, 0));

    let mut storage = PsymtabStorage::new();
    match debug {
        DebugSections::Stabs { symbols, strings } => {
            let input = StabsInput {
                symbols: &buffer[symbols.0..symbols.0 + symbols.1],
                strings: &buffer[strings.0..strings.0 + strings.1],
                format: NlistFormat {
                    endian,
                    value_size: 4,
                },
                text_addr,
                text_size,
                relative_strtab: false,
            };
            psymtab_stabs::build_psymtabs(&mut objfile, &mut storage, &input, None)?;
        }
        DebugSections::Mdebug { hdrr_offset } => {
            let input = MdebugInput {
                data: buffer,
                hdrr_offset,
                endian,
                relocatable: elf.header.e_type == goblin::elf::header::ET_REL,
            };
            psymtab_mdebug::parse_partial_symbols(&mut objfile, &mut storage, &input, None)?;
        }
    }

    Ok(LoadedObject {
        objfile,
        quick: PsymbolFunctions::new(storage),
    })
}

fn print_psymbols(loaded: &LoadedObject, matches: &ArgMatches) -> Result<(), Error> {
    let pc = matches.get_one::<String>("pc").map(|s| parse_addr(s)).transpose()?;
    let source = matches.get_one::<String>("source").map(String::as_str);

    let mut out: Box<dyn Write> = match matches.get_one::<PathBuf>("out") {
        Some(path) => Box::new(fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };

    loaded
        .quick
        .print_psymbols(&loaded.objfile, &mut out, pc, source)?;
    Ok(())
}

fn info_psymtabs(loaded: &LoadedObject, matches: &ArgMatches) -> Result<(), Error> {
    let filter = matches
        .get_one::<String>("regexp")
        .map(|pattern| Regex::new(pattern))
        .transpose()?;

    let storage = loaded.quick.storage();
    for pst in storage.iter() {
        let table = &storage[pst];
        if let Some(filter) = &filter {
            if !filter.is_match(&table.filename) {
                continue;
            }
        }

        println!("psymtab {} [{}]", table.filename, pst.index());
        if let Some(dirname) = &table.dirname {
            println!("  dirname {dirname}");
        }
        if table.text_low_valid || table.text_high_valid {
            println!(
                "  text addresses {:#x} -- {:#x}",
                table.text_low(&loaded.objfile),
                table.text_high(&loaded.objfile)
            );
        }
        println!(
            "  globals {}, statics {}, dependencies {}",
            table.global_psymbols.len(),
            table.static_psymbols.len(),
            table.dependencies.len()
        );
        println!("  readin {}", if table.readin { "yes" } else { "no" });
    }
    Ok(())
}

fn check_psymtabs(loaded: &LoadedObject) -> Result<(), Error> {
    let problems = loaded.quick.check_psymtabs(&loaded.objfile);
    if problems.is_empty() {
        println!("no inconsistencies found");
        return Ok(());
    }

    for problem in &problems {
        println!("{problem}");
    }
    Err(format!("{} inconsistencies", problems.len()).into())
}

fn parse_addr(text: &str) -> Result<u64, Error> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    Ok(parsed.map_err(|_| format!("invalid address: {text}"))?)
}

fn execute(matches: &ArgMatches) -> Result<(), Error> {
    let path = matches.get_one::<PathBuf>("path").unwrap();
    let buffer = fs::read(path)?;
    let loaded = load_object(path, &buffer)?;

    match matches.subcommand() {
        Some(("print-psymbols", sub)) => print_psymbols(&loaded, sub),
        Some(("info-psymtabs", sub)) => info_psymtabs(&loaded, sub),
        Some(("check-psymtabs", _)) => check_psymtabs(&loaded),
        _ => unreachable!("subcommand required"),
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new("psymtab-debug")
        .about("Dumps and checks partial symbol tables from an object file")
        .arg(
            Arg::new("path")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the object file"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("print-psymbols")
                .about("Dump partial symbol tables in full")
                .arg(
                    Arg::new("pc")
                        .long("pc")
                        .value_name("ADDR")
                        .help("Only the psymtab covering this address"),
                )
                .arg(
                    Arg::new("source")
                        .long("source")
                        .value_name("FILE")
                        .help("Only the psymtab for this source file"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write output to a file instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("info-psymtabs")
                .about("List partial symbol tables")
                .arg(Arg::new("regexp").help("Only filenames matching this regex")),
        )
        .subcommand(Command::new("check-psymtabs").about("Check psymtab consistency"))
        .get_matches();

    if let Err(error) = execute(&matches) {
        print_error(error.as_ref());
        std::process::exit(1);
    }
}
