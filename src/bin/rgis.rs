//! rgis - build and query static GIS item databases.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rgis::{
    Airport, Config, CsvParser, CsvRecord, GeoPos, GisItem, GisItemDB, GisItemDBFactory, Place,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Schema {
    /// Generic named locations (name,lat,lon,alt,kind,description)
    Place,
    /// Airports (id,lat,lon,elevation_ft,city,country,runways,towered)
    Airport,
}

#[derive(Parser, Debug)]
#[command(name = "rgis", version, about = "Build and query static GIS item databases", long_about = None)]
struct Args {
    /// Item schema of the database
    #[arg(short, long, value_enum, default_value = "place", global = true)]
    schema: Schema,

    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a database from a delimited text file
    Create {
        input: PathBuf,
        output: PathBuf,
        /// Field delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
    },
    /// Print the structure of a database as JSON
    Info { db: PathBuf },
    /// Look up an item by name
    Get { db: PathBuf, name: String },
    /// Find the item closest to a position
    Nearest {
        db: PathBuf,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 0.0)]
        alt: f64,
    },
    /// Find the n items closest to a position
    Knn {
        db: PathBuf,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        n: usize,
        #[arg(long, default_value_t = 0.0)]
        alt: f64,
    },
    /// Find all items within a distance (meters) of a position
    Within {
        db: PathBuf,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        meters: f64,
        #[arg(long, default_value_t = 0.0)]
        alt: f64,
    },
    /// Print every item as one JSON line
    Dump { db: PathBuf },
}

#[derive(Serialize)]
struct Hit<'a, T> {
    distance_m: f64,
    #[serde(flatten)]
    item: &'a T,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rgis=info"))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Config::from_json(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    match args.schema {
        Schema::Place => run::<Place>(args.command, config),
        Schema::Airport => run::<Airport>(args.command, config),
    }
}

fn run<T>(command: Command, config: Config) -> anyhow::Result<()>
where
    T: GisItem + CsvRecord + Serialize,
{
    match command {
        Command::Create {
            input,
            output,
            delimiter,
        } => {
            let parser = CsvParser::<T>::new().with_delimiter(delimiter);
            let mut factory = GisItemDBFactory::<T>::with_config(config);
            let n = factory
                .create_db(&parser, &input, &output)
                .with_context(|| format!("creating {}", output.display()))?;
            println!("{} {} items written to {}", n, T::SCHEMA, output.display());
        }
        Command::Info { db } => {
            let db = GisItemDB::<T>::open_with_config(&db, config)?;
            println!("{}", serde_json::to_string_pretty(&db.info()?)?);
        }
        Command::Get { db, name } => {
            let db = GisItemDB::<T>::open_with_config(&db, config)?;
            match db.get_item(&name)? {
                Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
                None => anyhow::bail!("no item named '{}'", name),
            }
        }
        Command::Nearest { db, lat, lon, alt } => {
            let db = GisItemDB::<T>::open_with_config(&db, config)?;
            if let Some((item, distance_m)) = db.get_nearest_item(&GeoPos::new(lat, lon, alt))? {
                print_hit(&item, distance_m)?;
            }
        }
        Command::Knn {
            db,
            lat,
            lon,
            n,
            alt,
        } => {
            let db = GisItemDB::<T>::open_with_config(&db, config)?;
            for (item, distance_m) in db.get_n_nearest_items(&GeoPos::new(lat, lon, alt), n)? {
                print_hit(&item, distance_m)?;
            }
        }
        Command::Within {
            db,
            lat,
            lon,
            meters,
            alt,
        } => {
            let db = GisItemDB::<T>::open_with_config(&db, config)?;
            for (item, distance_m) in db.get_items_within(&GeoPos::new(lat, lon, alt), meters)? {
                print_hit(&item, distance_m)?;
            }
        }
        Command::Dump { db } => {
            let db = GisItemDB::<T>::open_with_config(&db, config)?;
            for item in db.items() {
                println!("{}", serde_json::to_string(&item?)?);
            }
        }
    }
    Ok(())
}

fn print_hit<T: Serialize>(item: &T, distance_m: f64) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string(&Hit {
            distance_m,
            item
        })?
    );
    Ok(())
}
