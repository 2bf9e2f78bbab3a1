use cadenza::{DecodeHandler, Frame, StreamDecoder, WriteStatus};
use cadenza::core::io::ReadOnlySource;

/// Discards everything the decoder delivers.
struct Discard;

impl DecodeHandler for Discard {
    fn write(&mut self, _frame: &Frame, _channels: &[&[i32]]) -> WriteStatus {
        WriteStatus::Continue
    }
}

pub fn fuzz_stream_decoder(data: Vec<u8>, md5_checking: bool) {
    let mut decoder = StreamDecoder::default();
    decoder.set_md5_checking(md5_checking);
    decoder.set_metadata_respond_all();

    let source = ReadOnlySource::new(std::io::Cursor::new(data));

    if decoder.init_stream(Box::new(source)).is_ok() {
        let _ = decoder.process_until_end_of_stream(&mut Discard);
        let _ = decoder.finish();
    }
}
