#![no_main]

use libfuzzer_sys::fuzz_target;
use peerweave::metadata::module::ModuleDefinition;

fuzz_target!(|data: &[u8]| {
    let _ = ModuleDefinition::from_mem(data, "fuzz.pwmd");
});
