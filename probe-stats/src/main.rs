//! Probe Statistics
//!
//! A command-line tool that feeds a workload into the chained hash map and
//! reports its occupancy and chain structure: load factor, number of
//! collision chains, chain-length histogram, and the expected probe count
//! per lookup. Workloads are either the words of a text file (frequency
//! counting) or generated 64-bit keys.

use std::error::Error;
use std::fs;
use std::str::FromStr;

use chained_map::{ChainedHashMap, HashTable, IntBuildHasher, TableOptions};
use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Capacity configuration for the hash table
#[derive(Debug, Clone)]
enum CapacityConfig {
    /// Fixed number of entries to pre-size for
    Fixed(usize),

    /// Start at the minimum size and let the table grow (default)
    Auto,
}

impl FromStr for CapacityConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(CapacityConfig::Auto)
        } else {
            match s.parse::<usize>() {
                Ok(size) => Ok(CapacityConfig::Fixed(size)),
                Err(_) => Err(format!("Invalid capacity: '{}'. Use a number or 'auto'", s)),
            }
        }
    }
}

impl std::fmt::Display for CapacityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityConfig::Fixed(size) => write!(f, "{} (fixed)", size),
            CapacityConfig::Auto => write!(f, "auto"),
        }
    }
}

/// Command line arguments for the probe statistics tool
#[derive(Parser, Debug)]
#[clap(
    name = "Probe Statistics",
    version = "1.0",
    about = "Reports hash table occupancy and chain statistics for a workload"
)]
struct Args {
    /// Input text file; its whitespace-separated words become the keys
    #[clap(short, long, value_parser, conflicts_with = "random")]
    input: Option<String>,

    /// Generate this many random 64-bit keys instead of reading a file
    #[clap(short, long, value_parser)]
    random: Option<usize>,

    /// Table capacity: a number of entries, or 'auto' to grow on demand
    #[clap(short, long, value_parser, default_value = "auto")]
    capacity: CapacityConfig,

    /// Load-factor cap (clamped to 0.2..=0.99)
    #[clap(long, default_value = "0.88", value_parser)]
    load_factor: f32,

    /// Disable the adaptive secondary hash mixer
    #[clap(long, action)]
    no_adaptive: bool,

    /// How many of the most frequent words to print (file workloads only)
    #[clap(long, default_value = "10", value_parser)]
    top: usize,

    /// Seed for the random workload
    #[clap(long, default_value = "42", value_parser)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    println!("Configuration:");
    println!("  Capacity: {}", args.capacity);
    println!("  Load-factor cap: {}", args.load_factor);
    println!("  Adaptive hashing: {}", !args.no_adaptive);

    let options = TableOptions::default()
        .initial_capacity(match args.capacity {
            CapacityConfig::Fixed(size) => size,
            CapacityConfig::Auto => 0,
        })
        .max_load_factor(args.load_factor)
        .adaptive_hashing(!args.no_adaptive);

    match (&args.input, args.random) {
        (Some(path), _) => word_frequencies(path, options, args.top),
        (None, Some(count)) => random_workload(count, args.seed, options),
        (None, None) => Err("provide either --input FILE or --random COUNT".into()),
    }
}

/// Count how often every whitespace-separated word occurs in `counts`.
fn count_words<T: HashTable<String, u64>>(counts: &mut T, text: &str) -> usize {
    let mut total = 0usize;
    for word in text.split_whitespace() {
        total += 1;
        let word = word.to_string();
        let count = match counts.get(&word) {
            Some(&seen) => seen + 1,
            None => 1,
        };
        counts.insert(word, count);
    }
    total
}

fn word_frequencies(
    path: &str,
    options: TableOptions,
    top: usize,
) -> Result<(), Box<dyn Error>> {
    println!("\nReading from: {path}");
    let text = fs::read_to_string(path)?;
    info!("read {} bytes", text.len());

    let mut counts: ChainedHashMap<String, u64> = ChainedHashMap::with_options(options);
    let total = count_words(&mut counts, &text);
    println!("Counted {} words, {} unique", total, counts.len());

    let mut ranked: Vec<(&String, &u64)> = counts.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    println!("\nTop {} words:", top.min(ranked.len()));
    for (word, count) in ranked.iter().take(top) {
        println!("  {count:>8}  {word}");
    }

    println!("\nTable statistics:");
    print!("{}", counts.stats());
    Ok(())
}

fn random_workload(
    count: usize,
    seed: u64,
    options: TableOptions,
) -> Result<(), Box<dyn Error>> {
    println!("\nInserting {count} random 64-bit keys (seed {seed})");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table: ChainedHashMap<u64, u64, IntBuildHasher> =
        ChainedHashMap::with_options_and_hasher(options, IntBuildHasher::default());

    for _ in 0..count {
        let key: u64 = rng.random();
        table.insert(key, key);
    }
    info!("{} distinct keys stored", table.len());

    println!("\nTable statistics:");
    print!("{}", table.stats());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_config_parses() {
        assert!(matches!(
            CapacityConfig::from_str("auto"),
            Ok(CapacityConfig::Auto)
        ));
        assert!(matches!(
            CapacityConfig::from_str("4096"),
            Ok(CapacityConfig::Fixed(4096))
        ));
        assert!(CapacityConfig::from_str("many").is_err());
    }

    #[test]
    fn test_count_words() {
        let mut counts: ChainedHashMap<String, u64> = ChainedHashMap::new();
        let total = count_words(&mut counts, "the quick the lazy the");
        assert_eq!(total, 5);
        assert_eq!(counts.get("the"), Some(&3));
        assert_eq!(counts.get("quick"), Some(&1));
        assert_eq!(counts.len(), 3);
    }
}
