#![no_main]

use libfuzzer_sys::fuzz_target;
use peerweave::{blob::BlobShard, file::Input, TargetArch};

fuzz_target!(|data: &[u8]| {
    if let Ok(shard) = BlobShard::parse(Input::from_mem("fuzz.blob", data.to_vec()), TargetArch::None) {
        for index in 0..shard.entries.len() as u32 {
            let _ = shard.image(index);
            let _ = shard.debug_data(index);
            let _ = shard.config_data(index);
        }
    }
});
