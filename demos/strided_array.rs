use std::sync::Arc;

use twophase::{Comm, Datatype, FileContext, FileMode, FileStorage, FileView, Hints, ThreadGroup};

// A 64x64 row-major array of u32, distributed over 4 ranks by column blocks of 16.
// Each rank holds its block with one padding element per row in memory.
fn main() -> twophase::Result<()> {
    let (rows, cols, nprocs) = (64u64, 64u64, 4usize);
    let width = cols / nprocs as u64;
    let path = std::env::temp_dir().join("twophase_strided_array.bin");
    let storage = Arc::new(FileStorage::open(&path, FileMode::RDWR | FileMode::CREATE).map_err(
        |e| twophase::TpError::InvalidArgument(format!("cannot open {}: {e}", path.display())),
    )?);

    let hints = Hints::from_pairs([("cb_buffer_size", "4096"), ("cb_nodes", "2")])?;
    let results = ThreadGroup::new(nprocs).run(|comm| {
        let rank = comm.rank() as u64;
        // file: one row of this rank's block every `cols` elements
        let ft = Datatype::hindexed(&[width * 4], &[rank * width * 4], &Datatype::bytes(1))?
            .resized(cols * 4);
        // memory: `width` elements followed by one padding element
        let row = Datatype::bytes(width * 4).resized((width + 1) * 4);

        let mut local = Vec::with_capacity((rows * (width + 1) * 4) as usize);
        for r in 0..rows {
            for c in 0..width {
                let v = (r * cols + rank * width + c) as u32;
                local.extend_from_slice(&v.to_le_bytes());
            }
            local.extend_from_slice(&u32::MAX.to_le_bytes());
        }

        let mut fh = FileContext::new(comm, Arc::clone(&storage), hints.clone());
        fh.set_view(FileView::new(0, 4, ft)?);
        fh.write_at_all(0, &local, rows, &row)
    })?;

    for (rank, stats) in results.into_iter().enumerate() {
        println!("rank {rank}: {:?}", stats?);
    }

    let bytes = std::fs::read(&path)
        .map_err(|e| twophase::TpError::InvalidArgument(format!("cannot read back: {e}")))?;
    let ok = bytes
        .chunks_exact(4)
        .enumerate()
        .all(|(i, w)| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) == i as u32);
    println!("{} bytes written to {}, row-major order {}", bytes.len(), path.display(), if ok { "ok" } else { "BROKEN" });
    Ok(())
}
