#![no_main]
use cadenza_fuzz::fuzz_stream_decoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: Vec<u8>| {
    // Use the first byte to toggle MD5 checking so both paths are explored.
    let md5_checking = data.first().map_or(false, |b| b & 1 == 1);
    fuzz_stream_decoder(data, md5_checking);
});
