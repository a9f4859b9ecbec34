use std::fmt::Display;

use rdg_device::Pipeline;

use crate::{
    ParallelConfig, PassFlags,
    compile::{CompiledPass, PassIndex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanMode {
    ///Recorded on the executing thread when the submission reaches it.
    Inline,
    ///Recorded on a worker.
    Parallel,
}

///Contiguous run of kept passes on one pipeline, recorded into a single command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanPlan {
    pub(crate) pipeline: Pipeline,
    pub(crate) passes: Vec<PassIndex>,
    pub(crate) mode: SpanMode,
    ///Holds a single `NEVER_PARALLEL` pass.
    pub(crate) pinned: bool,
}

impl SpanPlan {
    fn new(pipeline: Pipeline, pinned: bool) -> Self {
        SpanPlan {
            pipeline,
            passes: Vec::new(),
            mode: SpanMode::Inline,
            pinned,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    pub fn passes(&self) -> &[PassIndex] {
        &self.passes
    }

    pub fn mode(&self) -> SpanMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    fn last(&self) -> Option<PassIndex> {
        self.passes.last().copied()
    }
}

impl Display for SpanPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.passes.first(), self.passes.last()) {
            (Some(first), Some(last)) => write!(
                f,
                "|S: {}..={} on {} ({} passes, {:?})|",
                first,
                last,
                self.pipeline,
                self.passes.len(),
                self.mode
            ),
            _ => write!(f, "|S: empty|"),
        }
    }
}

fn continues_group(passes: &[CompiledPass], span: &SpanPlan, idx: PassIndex) -> bool {
    match (span.last().and_then(|l| passes[l].merge_group), passes[idx].merge_group) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

///Partitions the kept passes into spans.
///
/// A span never crosses a pipeline change. Waiting passes start a new span, signaling passes end one, so every fence
/// is signaled at the end of a submission and waited for at the start of one. `NEVER_PARALLEL` passes get their own
/// inline span. Spans are split at `max_span_passes`, except within a render pass group.
pub(crate) fn partition(passes: &[CompiledPass], config: &ParallelConfig) -> Vec<SpanPlan> {
    let mut spans: Vec<SpanPlan> = Vec::new();
    let mut current: Option<SpanPlan> = None;

    for (idx, pass) in passes.iter().enumerate().filter(|(_, p)| p.kept) {
        let pinned = pass.flags.contains(PassFlags::NEVER_PARALLEL);
        let split = match &current {
            None => true,
            Some(span) => {
                span.pipeline != pass.pipeline
                    || !pass.waits.is_empty()
                    || pinned
                    || span.pinned
                    || (span.len() >= config.max_span_passes.max(1)
                        && !continues_group(passes, span, idx))
            }
        };
        if split {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            current = Some(SpanPlan::new(pass.pipeline, pinned));
        }

        if let Some(span) = current.as_mut() {
            span.passes.push(idx);
        }

        if pass.signal.is_some() || pinned {
            if let Some(span) = current.take() {
                spans.push(span);
            }
        }
    }
    if let Some(span) = current.take() {
        spans.push(span);
    }

    for span in spans.iter_mut() {
        span.mode = if !config.enabled || span.pinned || span.len() < config.min_span_passes {
            SpanMode::Inline
        } else {
            SpanMode::Parallel
        };
    }

    #[cfg(feature = "log_reasoning")]
    for span in &spans {
        log::trace!("{}", span);
    }

    spans
}

#[cfg(test)]
mod tests {
    use rdg_device::Fence;

    use super::*;

    fn pass(idx: PassIndex, pipeline: Pipeline) -> CompiledPass {
        let mut p = CompiledPass::new(idx, &format!("p{idx}"), PassFlags::COMPUTE, pipeline);
        p.kept = true;
        p
    }

    fn config(min: usize, max: usize) -> ParallelConfig {
        ParallelConfig {
            enabled: true,
            min_span_passes: min,
            max_span_passes: max,
        }
    }

    fn layout(spans: &[SpanPlan]) -> Vec<Vec<PassIndex>> {
        spans.iter().map(|s| s.passes.clone()).collect()
    }

    #[test]
    fn splits_on_pipeline_and_fences() {
        let g = Pipeline::Graphics;
        let c = Pipeline::AsyncCompute;
        let mut passes = vec![
            pass(0, g),
            pass(1, g),
            pass(2, c),
            pass(3, c),
            pass(4, g),
            pass(5, g),
            pass(6, g),
        ];
        passes[3].signal = Some(Fence::new(c, 1));
        passes[5].waits = vec![Fence::new(c, 1)];
        passes[1].kept = false;

        let spans = partition(&passes, &config(2, 32));
        assert_eq!(layout(&spans), vec![vec![0], vec![2, 3], vec![4], vec![5, 6]]);
        assert_eq!(spans[0].mode, SpanMode::Inline);
        assert_eq!(spans[1].mode, SpanMode::Parallel);
        assert_eq!(spans[1].pipeline, c);
    }

    #[test]
    fn never_parallel_is_isolated() {
        let g = Pipeline::Graphics;
        let mut passes = (0..5).map(|i| pass(i, g)).collect::<Vec<_>>();
        passes[2].flags |= PassFlags::NEVER_PARALLEL;
        let spans = partition(&passes, &config(1, 32));
        assert_eq!(layout(&spans), vec![vec![0, 1], vec![2], vec![3, 4]]);
        assert_eq!(spans[1].mode, SpanMode::Inline);
        assert_eq!(spans[0].mode, SpanMode::Parallel);
    }

    #[test]
    fn max_len_respects_groups() {
        let g = Pipeline::Graphics;
        let mut passes = (0..6).map(|i| pass(i, g)).collect::<Vec<_>>();
        for idx in 1..4 {
            passes[idx].merge_group = Some(0);
        }
        let spans = partition(&passes, &config(1, 2));
        assert_eq!(layout(&spans), vec![vec![0, 1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn disabled_parallelism_is_inline() {
        let g = Pipeline::Graphics;
        let passes = (0..8).map(|i| pass(i, g)).collect::<Vec<_>>();
        let cfg = ParallelConfig {
            enabled: false,
            ..config(1, 4)
        };
        let spans = partition(&passes, &cfg);
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.mode == SpanMode::Inline));
    }
}
