mod block;
mod forwarder;

pub use block::{AudioBlockInfo, SegmentPayload};
pub use forwarder::CoalescingForwarder;

#[cfg(test)]
mod tests {
    use super::*;
    use kfx_core::BLOCK_SIZE;
    use kfx_transport::LoopbackTransport;
    use std::sync::Arc;
    use std::time::Duration;

    fn push_block(forwarder: &CoalescingForwarder, start_sample: i64, samples: &[f32]) {
        let (index, block) = forwarder.get_free_block_slot().expect("block pool exhausted");
        block.fill(
            1,
            "kick",
            0x112233,
            48000,
            start_sample,
            &[samples],
            120,
            4,
            4,
            false,
            true,
        );
        forwarder.forward_block(index);
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition never became true");
    }

    /// Scenario S2 — 32 consecutive BLOCK_SIZE blocks emit 32 full payloads.
    #[test]
    fn s2_consecutive_full_blocks_emit_one_payload_each() {
        let transport = Arc::new(LoopbackTransport::new());
        let forwarder = CoalescingForwarder::new(transport.clone());

        for i in 0..32 {
            let samples = vec![i as f32; BLOCK_SIZE];
            push_block(&forwarder, (i * BLOCK_SIZE) as i64, &samples);
        }

        wait_until(|| transport.received_segments().len() == 32);
        forwarder.shutdown();

        let received = transport.received_segments();
        assert_eq!(received.len(), 32);
        for (i, seg) in received.iter().enumerate() {
            assert_eq!(seg.segment_sample_duration, BLOCK_SIZE as u32);
            assert_eq!(seg.segment_start_sample, (i * BLOCK_SIZE) as i64);
            assert!(seg.segment_audio_samples.iter().all(|&s| s == i as f32));
        }
    }

    /// Scenario S3 — two 3000-sample blocks yield exactly one full
    /// payload; the remaining 1904 samples linger until shutdown flush.
    #[test]
    fn s3_partial_blocks_yield_one_full_payload() {
        let transport = Arc::new(LoopbackTransport::new());
        let forwarder = CoalescingForwarder::new(transport.clone());

        push_block(&forwarder, 0, &vec![1.0; 3000]);
        push_block(&forwarder, 3000, &vec![2.0; 3000]);

        wait_until(|| transport.received_segments().len() >= 1);
        forwarder.shutdown();

        let received = transport.received_segments();
        assert!(!received.is_empty());
        assert_eq!(received[0].segment_sample_duration, BLOCK_SIZE as u32);
        assert_eq!(received[0].segment_start_sample, 0);
    }
}
