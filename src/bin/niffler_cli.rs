//! Simple CLI for exercising the B+ tree storage engine.
//!
//! Usage:
//!   niffler_cli <db_path> insert <key> <value>
//!   niffler_cli <db_path> find <key>
//!   niffler_cli <db_path> exists <key>
//!   niffler_cli <db_path> remove <key>
//!   niffler_cli <db_path> print
//!   niffler_cli <db_path> stats
//!   niffler_cli <db_path> bulk_insert <count>

use niffler_btree::{Config, Db};
use std::env;
use std::process::exit;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: niffler_cli <db_path> <command> [args...]");
        eprintln!("Commands:");
        eprintln!("  insert <key> <value> - Insert a key-value pair");
        eprintln!("  find <key>           - Look up a key");
        eprintln!("  exists <key>         - Check whether a key is present");
        eprintln!("  remove <key>         - Remove a key");
        eprintln!("  print                - Level-order dump of the tree");
        eprintln!("  stats                - Show database statistics");
        eprintln!("  bulk_insert <count>  - Insert count test records");
        exit(1);
    }

    let db_path = &args[1];
    let command = &args[2];

    let db = match Db::open(Config::new(db_path)) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: failed to open database: {e}");
            exit(1);
        }
    };

    match command.as_str() {
        "insert" => {
            if args.len() < 5 {
                eprintln!("Usage: niffler_cli <db_path> insert <key> <value>");
                exit(1);
            }
            match db.insert(args[3].as_bytes(), args[4].as_bytes()) {
                Ok(true) => println!("OK"),
                Ok(false) => println!("ALREADY_PRESENT"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "find" => {
            if args.len() < 4 {
                eprintln!("Usage: niffler_cli <db_path> find <key>");
                exit(1);
            }
            match db.find(args[3].as_bytes()) {
                Ok(Some(value)) => match String::from_utf8(value) {
                    Ok(s) => println!("{s}"),
                    Err(_) => println!("<binary data>"),
                },
                Ok(None) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "exists" => {
            if args.len() < 4 {
                eprintln!("Usage: niffler_cli <db_path> exists <key>");
                exit(1);
            }
            match db.exists(args[3].as_bytes()) {
                Ok(found) => println!("{found}"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "remove" => {
            if args.len() < 4 {
                eprintln!("Usage: niffler_cli <db_path> remove <key>");
                exit(1);
            }
            match db.remove(args[3].as_bytes()) {
                Ok(true) => println!("REMOVED"),
                Ok(false) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    exit(1);
                }
            }
        }

        "print" => match db.print() {
            Ok(dump) => println!("{dump}"),
            Err(e) => {
                eprintln!("ERROR: {e}");
                exit(1);
            }
        },

        "stats" => {
            let stats = db.stats();
            println!("page_count: {}", stats.page_count);
            println!("tree_height: {}", stats.tree_height);
            println!("num_internal_nodes: {}", stats.num_internal_nodes);
            println!("num_leaf_nodes: {}", stats.num_leaf_nodes);
        }

        "bulk_insert" => {
            if args.len() < 4 {
                eprintln!("Usage: niffler_cli <db_path> bulk_insert <count>");
                exit(1);
            }
            let count: usize = match args[3].parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("ERROR: invalid count");
                    exit(1);
                }
            };

            let start = std::time::Instant::now();
            for i in 0..count {
                let key = format!("key_{i:08}");
                let value = format!("value_{i}");
                if let Err(e) = db.insert(key.as_bytes(), value.as_bytes()) {
                    eprintln!("ERROR at {i}: {e}");
                    exit(1);
                }
            }
            let elapsed = start.elapsed();

            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {count}");
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {ops_per_sec:.0}");
        }

        _ => {
            eprintln!("Unknown command: {command}");
            exit(1);
        }
    }

    if let Err(e) = db.sync() {
        eprintln!("Warning: failed to sync: {e}");
    }
}
