use memfs::{FsStats, MemFs};

fn print_stats(stats: &FsStats) {
    println!("File System Stats:");
    println!("  Block Size: {} bytes", stats.block_size);
    println!("  Free Blocks: {}", stats.free_blocks);
    println!("  Free Inodes: {}", stats.free_inodes);
    println!("  Live Inodes: {}", stats.live_inodes);
    println!("  State: {:?}", stats.state);
}

pub fn main() {
    // 4KB blocks, 1000 blocks, 500 inodes.
    let mut fs = MemFs::new(4096, 1000, 500).expect("geometry is valid");

    println!("=== In-Memory File System Demo ===\n");
    print_stats(&fs.stats());
    println!();

    println!("Creating directories...");
    fs.create_directory("/home", 1000, 1000).unwrap();
    fs.create_directory("/home/user", 1000, 1000).unwrap();
    fs.create_directory("/var", 0, 0).unwrap();
    fs.create_directory("/var/log", 0, 0).unwrap();
    println!("directories created\n");

    println!("Creating files...");
    fs.create_file("/home/user/file1.txt", 1000, 1000).unwrap();
    fs.create_file("/home/user/file2.txt", 1000, 1000).unwrap();
    fs.create_file("/var/log/system.log", 0, 0).unwrap();
    println!("files created\n");

    println!("Writing to file...");
    let content = "Hello, in-memory file system!\nThis is a test file.";
    fs.write_file("/home/user/file1.txt", content.as_bytes())
        .unwrap();
    println!("data written to /home/user/file1.txt\n");

    println!("Reading from file...");
    let data = fs.read_file("/home/user/file1.txt").unwrap();
    println!("Content: {}\n", String::from_utf8_lossy(&data));

    println!("Listing /home/user:");
    for name in fs.list_directory("/home/user") {
        println!("  - {}", name);
    }
    println!();

    println!("Deleting /home/user/file2.txt...");
    fs.delete_file("/home/user/file2.txt").unwrap();
    println!("Listing /home/user after deletion:");
    for name in fs.list_directory("/home/user") {
        println!("  - {}", name);
    }
    println!();

    print_stats(&fs.stats());
}
