//! Sample ring buffer between the audio callback and the capture thread.
//!
//! The cpal callback runs on a realtime thread and must never block, so it
//! pushes into a lock-free single-producer/single-consumer ring. The capture
//! thread pops whole frames out of it at its own pace.
//!
//! # Example
//!
//! ```
//! use radiocast_lib::audio::buffer::SampleRingBuffer;
//!
//! let (mut producer, mut consumer) = SampleRingBuffer::new(4096);
//!
//! producer.push_slice(&[1, 2, 3, 4]);
//!
//! let mut frame = [0i32; 4];
//! assert!(consumer.pop_frame(&mut frame));
//! assert_eq!(frame, [1, 2, 3, 4]);
//! ```

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Lock-free ring of interleaved i32 samples
pub struct SampleRingBuffer;

/// Writing half, owned by the audio callback
pub struct SampleProducer {
    producer: ringbuf::HeapProd<i32>,
}

/// Reading half, owned by the capture thread
pub struct SampleConsumer {
    consumer: ringbuf::HeapCons<i32>,
}

impl SampleRingBuffer {
    /// Create a ring holding `capacity` samples
    ///
    /// # Returns
    ///
    /// A `(producer, consumer)` pair
    pub fn new(capacity: usize) -> (SampleProducer, SampleConsumer) {
        let rb = HeapRb::<i32>::new(capacity);
        let (producer, consumer) = rb.split();

        (SampleProducer { producer }, SampleConsumer { consumer })
    }

    /// Create a ring sized for `frames` whole frames of `samples_per_frame`
    pub fn for_frames(
        samples_per_frame: usize,
        frames: usize,
    ) -> (SampleProducer, SampleConsumer) {
        Self::new(samples_per_frame.max(1) * frames.max(1))
    }
}

impl SampleProducer {
    /// Push as many samples as fit
    ///
    /// # Returns
    ///
    /// The number of samples written; anything short of `samples.len()` is an
    /// overrun and the remainder is lost.
    pub fn push_slice(&mut self, samples: &[i32]) -> usize {
        self.producer.push_slice(samples)
    }

    /// Ring capacity, in samples
    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }
}

impl SampleConsumer {
    /// Fill `frame` completely, or leave the ring untouched
    ///
    /// # Returns
    ///
    /// `true` if a whole frame was read
    pub fn pop_frame(&mut self, frame: &mut [i32]) -> bool {
        if self.available_samples() < frame.len() {
            return false;
        }
        self.consumer.pop_slice(frame) == frame.len()
    }

    /// Samples ready to read
    pub fn available_samples(&self) -> usize {
        self.consumer.occupied_len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_creation() {
        let (producer, consumer) = SampleRingBuffer::new(1024);
        assert_eq!(producer.capacity(), 1024);
        assert_eq!(consumer.available_samples(), 0);
    }

    #[test]
    fn test_for_frames_capacity() {
        let (producer, _) = SampleRingBuffer::for_frames(8192 * 2, 8);
        assert_eq!(producer.capacity(), 8192 * 2 * 8);
    }

    #[test]
    fn test_pop_frame_requires_whole_frame() {
        let (mut producer, mut consumer) = SampleRingBuffer::new(16);

        producer.push_slice(&[1, 2, 3]);
        let mut frame = [0i32; 4];
        assert!(!consumer.pop_frame(&mut frame));
        assert_eq!(consumer.available_samples(), 3, "Partial frame must stay buffered");

        producer.push_slice(&[4, 5]);
        assert!(consumer.pop_frame(&mut frame));
        assert_eq!(frame, [1, 2, 3, 4]);
        assert_eq!(consumer.available_samples(), 1);
    }

    #[test]
    fn test_overrun_is_reported() {
        let (mut producer, consumer) = SampleRingBuffer::new(10);

        let written = producer.push_slice(&[7i32; 12]);
        assert_eq!(written, 10);
        assert_eq!(producer.push_slice(&[1]), 0);
        assert_eq!(consumer.available_samples(), 10);
    }

    #[test]
    fn test_order_is_preserved() {
        let (mut producer, mut consumer) = SampleRingBuffer::new(64);
        let input: Vec<i32> = (0..40).collect();
        producer.push_slice(&input);

        let mut out = Vec::new();
        let mut frame = [0i32; 8];
        while consumer.pop_frame(&mut frame) {
            out.extend_from_slice(&frame);
        }
        assert_eq!(out, input);
        assert_eq!(consumer.available_samples(), 0);
    }
}
