// SPDX-License-Identifier: CEPL-1.0
//! Creation order of every GPU object the session owns.
//!
//! Stages are entered before the objects they name are created, so a stage
//! that fails halfway is still released at shutdown. Release routines skip
//! null handles.

use tracing::debug;

use crate::error::{GpuError, GpuResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Instance,
    DebugReport,
    Device,
    CommandPool,
    Surface,
    Swapchain,
    DepthBuffer,
    ImageViews,
    RenderPass,
    Framebuffers,
    CommandBuffers,
    Fences,
    Semaphores,
}

impl Stage {
    /// Full creation order. `DebugReport` is skipped outside debug builds.
    pub const CREATION_ORDER: [Stage; 13] = [
        Stage::Instance,
        Stage::DebugReport,
        Stage::Device,
        Stage::CommandPool,
        Stage::Surface,
        Stage::Swapchain,
        Stage::DepthBuffer,
        Stage::ImageViews,
        Stage::RenderPass,
        Stage::Framebuffers,
        Stage::CommandBuffers,
        Stage::Fences,
        Stage::Semaphores,
    ];

    /// Stages whose objects must exist before this one can be created, and
    /// must outlive it.
    pub fn parents(self) -> &'static [Stage] {
        match self {
            Stage::Instance => &[],
            Stage::DebugReport => &[Stage::Instance],
            Stage::Device => &[Stage::Instance],
            Stage::Surface => &[Stage::Instance],
            Stage::Swapchain => &[Stage::Device, Stage::Surface],
            Stage::DepthBuffer => &[Stage::Device, Stage::Swapchain],
            Stage::ImageViews => &[Stage::Swapchain, Stage::DepthBuffer],
            Stage::RenderPass => &[Stage::Device, Stage::Swapchain],
            Stage::Framebuffers => &[Stage::RenderPass, Stage::ImageViews],
            Stage::CommandPool => &[Stage::Device],
            Stage::CommandBuffers => &[Stage::CommandPool, Stage::Swapchain],
            Stage::Fences => &[Stage::Device, Stage::Swapchain],
            Stage::Semaphores => &[Stage::Device],
        }
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    entered: Vec<Stage>,
}

impl Ledger {
    pub fn enter(&mut self, stage: Stage) -> GpuResult<()> {
        if let Some(&missing) = stage.parents().iter().find(|p| !self.entered.contains(p)) {
            return Err(GpuError::OutOfOrder { stage, missing });
        }
        if !self.entered.contains(&stage) {
            debug!(?stage, "entering stage");
            self.entered.push(stage);
        }
        Ok(())
    }

    pub fn entered(&self) -> &[Stage] {
        &self.entered
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.entered.contains(&stage)
    }

    /// Empties the ledger, newest stage first.
    pub fn drain_reverse(&mut self) -> impl Iterator<Item = Stage> {
        let mut stages = std::mem::take(&mut self.entered);
        stages.reverse();
        stages.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> Ledger {
        let mut ledger = Ledger::default();
        for stage in Stage::CREATION_ORDER {
            ledger.enter(stage).unwrap();
        }
        ledger
    }

    #[test]
    fn creation_order_satisfies_every_parent() {
        let ledger = full();
        assert_eq!(ledger.entered(), &Stage::CREATION_ORDER);
    }

    #[test]
    fn entering_before_parent_is_rejected() {
        let mut ledger = Ledger::default();
        ledger.enter(Stage::Instance).unwrap();
        match ledger.enter(Stage::Swapchain) {
            Err(GpuError::OutOfOrder { stage, missing }) => {
                assert_eq!(stage, Stage::Swapchain);
                assert_eq!(missing, Stage::Device);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ledger.entered(), &[Stage::Instance]);
    }

    #[test]
    fn debug_report_is_optional() {
        let mut ledger = Ledger::default();
        for stage in Stage::CREATION_ORDER {
            if stage != Stage::DebugReport {
                ledger.enter(stage).unwrap();
            }
        }
        assert!(!ledger.contains(Stage::DebugReport));
        assert_eq!(ledger.entered().len(), 12);
    }

    #[test]
    fn teardown_is_exact_reverse_of_creation() {
        let mut ledger = full();
        let teardown: Vec<_> = ledger.drain_reverse().collect();
        let mut expected = Stage::CREATION_ORDER.to_vec();
        expected.reverse();
        assert_eq!(teardown, expected);
        assert!(ledger.entered().is_empty());
    }

    #[test]
    fn teardown_never_outlives_a_parent() {
        let mut ledger = full();
        let teardown: Vec<_> = ledger.drain_reverse().collect();
        for (pos, stage) in teardown.iter().enumerate() {
            for parent in stage.parents() {
                let parent_pos = teardown.iter().position(|s| s == parent).unwrap();
                assert!(
                    parent_pos > pos,
                    "{parent:?} released before its child {stage:?}"
                );
            }
        }
        assert_eq!(teardown.first(), Some(&Stage::Semaphores));
        assert_eq!(teardown.last(), Some(&Stage::Instance));
    }

    #[test]
    fn partial_construction_tears_down_what_was_entered() {
        let mut ledger = Ledger::default();
        for stage in [Stage::Instance, Stage::Device, Stage::Surface, Stage::Swapchain] {
            ledger.enter(stage).unwrap();
        }
        let teardown: Vec<_> = ledger.drain_reverse().collect();
        assert_eq!(
            teardown,
            [Stage::Swapchain, Stage::Surface, Stage::Device, Stage::Instance]
        );
    }

    #[test]
    fn command_pool_follows_the_device_directly() {
        let order = Stage::CREATION_ORDER;
        let device = order.iter().position(|&s| s == Stage::Device).unwrap();
        assert_eq!(order[device + 1], Stage::CommandPool);

        let mut ledger = full();
        let teardown: Vec<_> = ledger.drain_reverse().collect();
        let pool = teardown.iter().position(|&s| s == Stage::CommandPool).unwrap();
        assert_eq!(teardown[pool - 1], Stage::Surface);
        assert_eq!(teardown[pool + 1], Stage::Device);
    }

    #[test]
    fn reentering_a_stage_is_idempotent() {
        let mut ledger = Ledger::default();
        ledger.enter(Stage::Instance).unwrap();
        ledger.enter(Stage::Instance).unwrap();
        assert_eq!(ledger.entered(), &[Stage::Instance]);
    }
}
