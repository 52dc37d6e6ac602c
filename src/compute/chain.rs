//! Helpers for chaining compute passes
//!
//! Passes read the previous pass's outputs and write their own. Two patterns
//! need image pairs: iterative passes that swap input and output every
//! iteration (jump flood) and temporal passes that swap every frame.

/// Local workgroup edge length every compute shader is written for.
pub const WORKGROUP_SIZE: u32 = 16;

/// Number of workgroups covering `work_size` invocations along one axis.
pub fn dispatch_size(work_size: u32) -> u32 {
    work_size.div_ceil(WORKGROUP_SIZE)
}

/// `ceil(log2(max(width, height)))`: jump flood iterations needed to
/// propagate seeds across the whole image.
pub fn jump_flood_pass_count(width: u32, height: u32) -> u32 {
    let extent = width.max(height);
    if extent <= 1 {
        return 0;
    }
    u32::BITS - (extent - 1).leading_zeros()
}

/// One jump flood iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpFloodStep {
    pub iteration: u32,
    /// Sampling distance in texels; halves every iteration down to 1.
    pub offset: u32,
    /// Whether this iteration reads the first image of the pair and writes the second.
    pub reads_first: bool,
}

impl JumpFloodStep {
    /// Index into the image pair this iteration reads.
    pub fn input_index(&self) -> usize {
        if self.reads_first {
            0
        } else {
            1
        }
    }

    /// Index into the image pair this iteration writes.
    pub fn output_index(&self) -> usize {
        1 - self.input_index()
    }
}

/// Iterator over the jump flood iterations for an image of the given size.
///
/// The seed image is expected in the first image of the pair.
#[derive(Debug, Clone)]
pub struct JumpFloodSchedule {
    passes: u32,
    next: u32,
}

impl JumpFloodSchedule {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            passes: jump_flood_pass_count(width, height),
            next: 0,
        }
    }

    pub fn pass_count(&self) -> u32 {
        self.passes
    }

    /// Index into the image pair that holds the result once every step has run.
    pub fn result_index(&self) -> usize {
        (self.passes % 2) as usize
    }
}

impl Iterator for JumpFloodSchedule {
    type Item = JumpFloodStep;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.passes {
            return None;
        }
        let iteration = self.next;
        self.next += 1;
        Some(JumpFloodStep {
            iteration,
            offset: 1 << (self.passes - iteration - 1),
            reads_first: iteration % 2 == 0,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.passes - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for JumpFloodSchedule {}

/// Two values used alternately as input and output.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    items: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            items: [first, second],
            current: 0,
        }
    }

    /// The value to read from.
    pub fn current(&self) -> &T {
        &self.items[self.current]
    }

    /// The value to write to.
    pub fn other(&self) -> &T {
        &self.items[1 - self.current]
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }
}

/// Images a temporal pass uses on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalFrame<'a, T> {
    /// Last frame's output.
    pub history: &'a T,
    pub output: &'a T,
    /// Set on the very first frame, when `history` holds nothing yet.
    pub clear_history: bool,
}

/// A pair of persistent images for a pass that accumulates over frames.
///
/// On frame `f` the pass writes image `f % 2` and reads the other one,
/// which is what frame `f - 1` wrote.
#[derive(Debug, Clone)]
pub struct TemporalHistory<T> {
    images: [T; 2],
}

impl<T> TemporalHistory<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            images: [first, second],
        }
    }

    pub fn frame(&self, frame_index: u64) -> TemporalFrame<'_, T> {
        let output = (frame_index % 2) as usize;
        TemporalFrame {
            history: &self.images[1 - output],
            output: &self.images[output],
            clear_history: frame_index == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(16, 1)]
    #[case(17, 2)]
    #[case(1920, 120)]
    #[case(1080, 68)]
    fn test_dispatch_size(#[case] work: u32, #[case] groups: u32) {
        assert_eq!(dispatch_size(work), groups);
    }

    #[rstest]
    #[case(1, 1, 0)]
    #[case(2, 1, 1)]
    #[case(4, 3, 2)]
    #[case(5, 5, 3)]
    #[case(512, 256, 9)]
    #[case(1280, 720, 11)]
    fn test_jump_flood_pass_count(#[case] w: u32, #[case] h: u32, #[case] passes: u32) {
        assert_eq!(jump_flood_pass_count(w, h), passes);
    }

    #[test]
    fn test_jump_flood_schedule_halves_offset_and_alternates() {
        let schedule = JumpFloodSchedule::new(8, 8);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.result_index(), 1);

        let steps: Vec<_> = schedule.collect();
        assert_eq!(
            steps.iter().map(|s| s.offset).collect::<Vec<_>>(),
            vec![4, 2, 1]
        );
        assert_eq!(
            steps.iter().map(|s| s.output_index()).collect::<Vec<_>>(),
            vec![1, 0, 1]
        );
    }

    #[test]
    fn test_ping_pong_swap() {
        let mut pair = PingPong::new("a", "b");
        assert_eq!((*pair.current(), *pair.other()), ("a", "b"));
        pair.swap();
        assert_eq!((*pair.current(), *pair.other()), ("b", "a"));
    }

    #[test]
    fn test_temporal_history_reads_previous_output() {
        let history = TemporalHistory::new(0, 1);

        let first = history.frame(0);
        assert!(first.clear_history);
        assert_eq!((*first.output, *first.history), (0, 1));

        for f in 1..6u64 {
            let previous = history.frame(f - 1);
            let current = history.frame(f);
            assert!(!current.clear_history);
            assert_eq!(current.history, previous.output);
            assert_ne!(current.output, current.history);
        }
    }
}
