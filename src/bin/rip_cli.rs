use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use psx_rip_tools::disc::LogicalDisc;
use psx_rip_tools::scene;
use psx_rip_tools::table;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 4 {
        eprintln!("Usage:");
        eprintln!("  rip-cli <disc_image> <model_table> <output_dir>");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  rip-cli ./game.bin ./models.txt ./ripped");
        std::process::exit(1);
    }

    let disc_path = PathBuf::from(&args[1]);
    let table_path = PathBuf::from(&args[2]);
    let output_dir = PathBuf::from(&args[3]);

    let entries = match table::parse_model_table(&table_path) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Failed to load model table: {:?}", e);
            std::process::exit(1);
        }
    };

    let mut disc = match File::open(&disc_path)
        .map_err(anyhow::Error::from)
        .and_then(|f| LogicalDisc::open(BufReader::new(f)))
    {
        Ok(disc) => disc,
        Err(e) => {
            eprintln!("Failed to open disc image {}: {:?}", disc_path.display(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        eprintln!("Failed to create {}: {:?}", output_dir.display(), e);
        std::process::exit(1);
    }

    eprintln!("Ripping {} models from {} ...", entries.len(), disc_path.display());

    let mut failures = 0usize;
    for entry in &entries {
        eprintln!(
            "  {} (sector {:#x}, {} animation sets)",
            entry.name,
            entry.model_sector,
            entry.animations.len()
        );

        let result = scene::extract_model(
            &mut disc,
            &entry.name,
            entry.model_sector,
            &entry.animations,
            entry.blink_offset,
        )
        .and_then(|root| {
            let path = output_dir.join(format!("{}.gltf", entry.name));
            scene::write_gltf(&root, &path)?;
            Ok(path)
        });

        match result {
            Ok(path) => eprintln!("    -> {}", path.display()),
            Err(e) => {
                // Keep going; one bad entry should not sink the batch.
                eprintln!("    FAILED: {:?}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        eprintln!("Done with {} failure(s) out of {}", failures, entries.len());
        std::process::exit(1);
    }
    eprintln!("Done: {} models", entries.len());
}
