use data_loader::{Dataset, LoadOptions};
use std::path::Path;
use std::time::Instant;

fn main() {
    let data_dir = Path::new("data/anime");
    let options = LoadOptions::new().with_excluded_genre("Hentai");

    println!("Loading anime dataset...\n");

    let start = Instant::now();
    let dataset = Dataset::load_with(data_dir, &options).expect("Failed to load dataset");
    let elapsed = start.elapsed();

    let (users, anime, records) = dataset.counts();
    let stats = dataset.feedback().compute_stats();

    println!("\n=== Load Complete ===");
    println!("Time taken: {:?}", elapsed);
    println!("Users: {}", users);
    println!("Anime: {}", anime);
    println!("Ratings: {}", records);
    println!("Rated anime: {}", stats.len());
    println!(
        "\nPerformance: {:.0} ratings/second",
        records as f64 / elapsed.as_secs_f64()
    );
}
