use bucket_map::HashMap;
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Keep inserting this many entries past the initial capacity.
    #[arg(short = 'e', long = "extra", default_value_t = 0)]
    extra: usize,

    /// Delete every n-th key once filled, then refill the holes with new keys.
    #[arg(short = 'd', long = "delete_every")]
    delete_every: Option<usize>,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: HashMap<u64, u64> = HashMap::with_capacity(args.target_capacity);
    let initial_buckets = map.debug_stats().bucket_count;

    println!("Actual capacity: {}", map.capacity());
    println!("Filling map with u64 keys...");

    let total = (map.capacity() + args.extra) as u64;
    let mut growths = 0;
    let mut growing = false;
    for key in 0..total {
        map.put(key, key);

        let now_growing = map.debug_stats().old_bucket_count > 0;
        if now_growing && !growing {
            growths += 1;
        }
        growing = now_growing;
    }

    if let Some(every) = args.delete_every.filter(|&n| n > 0) {
        let mut deleted = 0;
        for key in (0..total).step_by(every) {
            if map.delete(&key) {
                deleted += 1;
            }
        }
        for key in total..total + deleted {
            map.put(key, key);
        }
        println!("Deleted and refilled {} keys", deleted);
    }

    println!("Map holds {} entries", map.len());
    println!(
        "Buckets: {} -> {} after {} growth cycles",
        initial_buckets,
        map.debug_stats().bucket_count,
        growths
    );
    map.debug_stats().print();
}
