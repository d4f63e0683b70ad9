// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, warn};

use crate::error::{VkError, VkResult};

/// Frame-slot and semaphore-slot indices. They advance together but wrap
/// independently: N frame slots vs. one semaphore slot per swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCounters {
    frame: usize,
    frames: usize,
    semaphore: usize,
    semaphores: usize,
}

impl FrameCounters {
    pub fn new(frames: usize, semaphores: usize) -> Self {
        Self {
            frame: 0,
            frames: frames.max(1),
            semaphore: 0,
            semaphores: semaphores.max(1),
        }
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn semaphore(&self) -> usize {
        self.semaphore
    }

    pub fn advance(&mut self) {
        self.frame = (self.frame + 1) % self.frames;
        self.semaphore = (self.semaphore + 1) % self.semaphores;
    }

    /// Semaphore slots were rebuilt for a new image count.
    pub fn reset_semaphores(&mut self, semaphores: usize) {
        self.semaphores = semaphores.max(1);
        self.semaphore = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence observed signaled; CPU may reuse the slot.
    Available,
    Recording,
    /// Submitted, fence not yet observed.
    Pending,
}

/// CPU-side view of frame-slot ownership. Transitions out of order are
/// programming errors and surface as `VkError::SlotOrder`.
#[derive(Clone, Debug)]
pub struct SlotLedger {
    states: Vec<SlotState>,
}

impl SlotLedger {
    pub fn new(slots: usize) -> Self {
        Self {
            states: vec![SlotState::Available; slots],
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Slots the GPU or the recorder still holds.
    pub fn busy(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s != SlotState::Available)
            .count()
    }

    /// Fence wait returned; the slot is free.
    pub fn retire(&mut self, slot: usize) -> VkResult<()> {
        match self.states[slot] {
            SlotState::Pending | SlotState::Available => {
                self.states[slot] = SlotState::Available;
                Ok(())
            }
            state => Err(VkError::SlotOrder {
                slot,
                state,
                op: "retire",
            }),
        }
    }

    /// A pending slot must be retired first; its fence has not been seen.
    pub fn begin(&mut self, slot: usize) -> VkResult<()> {
        self.step(slot, SlotState::Available, SlotState::Recording, "begin")
    }

    pub fn submit(&mut self, slot: usize) -> VkResult<()> {
        self.step(slot, SlotState::Recording, SlotState::Pending, "submit")
    }

    /// Recording abandoned before submission.
    pub fn abandon(&mut self, slot: usize) -> VkResult<()> {
        self.step(slot, SlotState::Recording, SlotState::Available, "abandon")
    }

    /// Device idle: nothing is pending anywhere.
    pub fn release_all(&mut self) {
        self.states.fill(SlotState::Available);
    }

    fn step(
        &mut self,
        slot: usize,
        from: SlotState,
        to: SlotState,
        op: &'static str,
    ) -> VkResult<()> {
        let state = self.states[slot];
        if state != from {
            return Err(VkError::SlotOrder { slot, state, op });
        }
        self.states[slot] = to;
        Ok(())
    }
}

/// Outcome of an acquire or present call, stale-swapchain errors folded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl SwapchainStatus {
    /// `Ok(suboptimal)` as returned by ash; out-of-date becomes a status,
    /// every other error stays fatal.
    pub fn classify(r: Result<bool, vk::Result>) -> VkResult<Self> {
        match r {
            Ok(false) => Ok(Self::Optimal),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(VkError::Vulkan(e)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    Recreate,
}

/// After acquire: only a stale image, or a suboptimal one while a resize is
/// pending, aborts the frame.
pub fn acquire_action(status: SwapchainStatus, resize_pending: bool) -> FrameAction {
    match status {
        SwapchainStatus::OutOfDate => FrameAction::Recreate,
        SwapchainStatus::Suboptimal if resize_pending => FrameAction::Recreate,
        _ => FrameAction::Continue,
    }
}

/// After present: out-of-date always recreates, and so does a pending
/// resize, whatever the present result.
pub fn present_action(status: SwapchainStatus, resize_pending: bool) -> FrameAction {
    match status {
        SwapchainStatus::OutOfDate => FrameAction::Recreate,
        _ if resize_pending => FrameAction::Recreate,
        _ => FrameAction::Continue,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStep {
    /// Slot reserved for recording. Reset its fence and command buffer now.
    Record { frame: usize },
    /// Stale image: recreate, nothing was reset and nothing advanced.
    Recreate,
}

/// Per-frame step order with the Vulkan calls taken out. The renderer calls
/// into the GPU between steps:
///
/// wait fence -> `fence_signaled` -> acquire -> `acquired` -> reset fence,
/// record, submit -> `submitted` -> present -> `presented`.
///
/// A failure after the fence reset goes through `abandoned` instead.
#[derive(Clone, Debug)]
pub struct FrameLoop {
    counters: FrameCounters,
    ledger: SlotLedger,
}

impl FrameLoop {
    pub fn new(frames: usize, semaphores: usize) -> Self {
        Self {
            counters: FrameCounters::new(frames, semaphores),
            ledger: SlotLedger::new(frames.max(1)),
        }
    }

    pub fn frame(&self) -> usize {
        self.counters.frame()
    }

    pub fn semaphore(&self) -> usize {
        self.counters.semaphore()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.ledger.state(slot)
    }

    pub fn busy(&self) -> usize {
        self.ledger.busy()
    }

    pub fn fence_signaled(&mut self) -> VkResult<()> {
        self.ledger.retire(self.counters.frame())
    }

    pub fn acquired(
        &mut self,
        status: SwapchainStatus,
        resize_pending: bool,
    ) -> VkResult<AcquireStep> {
        match acquire_action(status, resize_pending) {
            FrameAction::Recreate => Ok(AcquireStep::Recreate),
            FrameAction::Continue => {
                let frame = self.counters.frame();
                self.ledger.begin(frame)?;
                Ok(AcquireStep::Record { frame })
            }
        }
    }

    pub fn submitted(&mut self) -> VkResult<()> {
        self.ledger.submit(self.counters.frame())
    }

    /// Record or submit failed after the reset. The slot is free again once
    /// its fence is restored; counters stay where they were.
    pub fn abandoned(&mut self) -> VkResult<()> {
        self.ledger.abandon(self.counters.frame())
    }

    /// Counters advance on every present, including one that ends in a
    /// recreate.
    pub fn presented(&mut self, status: SwapchainStatus, resize_pending: bool) -> FrameAction {
        self.counters.advance();
        present_action(status, resize_pending)
    }

    /// Called after a device-idle swapchain rebuild.
    pub fn swapchain_rebuilt(&mut self, images: usize) {
        self.counters.reset_semaphores(images);
        self.ledger.release_all();
    }
}

/// Fence wait bound, kept in both units so a timeout reports milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceWait {
    pub ns: u64,
    pub ms: u64,
}

impl FenceWait {
    pub fn new(ns: u64, ms: u64) -> Self {
        Self { ns, ms }
    }

    fn check(&self, r: Result<(), vk::Result>) -> VkResult<()> {
        match r {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VkError::FenceTimeout(self.ms)),
            Err(e) => Err(e.into()),
        }
    }
}

fn signaled_fence_info() -> vk::FenceCreateInfo<'static> {
    vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub fence: vk::Fence,
    pub cmd: vk::CommandBuffer,
    pub desc_set: vk::DescriptorSet,
}

/// Command pool plus one fence and one primary command buffer per frame slot.
pub struct FrameSlots {
    device: ash::Device,
    pool: vk::CommandPool,
    timeout: FenceWait,
    pub slots: Vec<FrameSlot>,
}

impl FrameSlots {
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        count: usize,
        timeout: FenceWait,
    ) -> VkResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = device.create_command_pool(&pool_info, None)?;
        let mut out = Self {
            device: device.clone(),
            pool,
            timeout,
            slots: Vec::with_capacity(count),
        };

        let cmds = out.allocate(count)?;
        let fence_ci = signaled_fence_info();
        for cmd in cmds {
            // on error `out` unwinds the pool and any fences made so far
            let fence = device.create_fence(&fence_ci, None)?;
            out.slots.push(FrameSlot {
                fence,
                cmd,
                desc_set: vk::DescriptorSet::null(),
            });
        }
        Ok(out)
    }

    unsafe fn allocate(&self, count: usize) -> VkResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        Ok(self.device.allocate_command_buffers(&alloc_info)?)
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Frees and reallocates every slot's command buffer. Caller guarantees
    /// the device is idle.
    pub unsafe fn reallocate_command_buffers(&mut self) -> VkResult<()> {
        let old: Vec<_> = self.slots.iter().map(|s| s.cmd).collect();
        self.device.free_command_buffers(self.pool, &old);
        let fresh = self.allocate(self.slots.len())?;
        for (slot, cmd) in self.slots.iter_mut().zip(fresh) {
            slot.cmd = cmd;
        }
        Ok(())
    }

    /// Waits for the slot's last submission, bounded by the fence timeout.
    pub unsafe fn wait(&self, slot: usize) -> VkResult<()> {
        let fence = self.slots[slot].fence;
        self.timeout
            .check(self.device.wait_for_fences(&[fence], true, self.timeout.ns))
    }

    /// Fence back to unsignaled and command buffer emptied; only after a
    /// successful acquire.
    pub unsafe fn reset(&self, slot: usize) -> VkResult<()> {
        let s = &self.slots[slot];
        self.device.reset_fences(&[s.fence])?;
        self.device
            .reset_command_buffer(s.cmd, vk::CommandBufferResetFlags::empty())?;
        Ok(())
    }

    /// Replaces a fence that was reset but never reached a successful submit
    /// with a fresh signaled one, so the next wait on the slot returns.
    pub unsafe fn restore(&mut self, slot: usize) -> VkResult<()> {
        let fence = self.device.create_fence(&signaled_fence_info(), None)?;
        let stale = std::mem::replace(&mut self.slots[slot].fence, fence);
        self.device.destroy_fence(stale, None);
        Ok(())
    }

    pub unsafe fn wait_all(&self) -> VkResult<()> {
        let fences: Vec<_> = self.slots.iter().map(|s| s.fence).collect();
        if fences.is_empty() {
            return Ok(());
        }
        self.timeout
            .check(self.device.wait_for_fences(&fences, true, self.timeout.ns))
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.wait_all() {
                warn!("frame slots: {e}; destroying fences anyway");
            }
            for s in &self.slots {
                self.device.destroy_fence(s.fence, None);
            }
            // destroying the pool frees its command buffers
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SemaphoreSlot {
    pub acquire: vk::Semaphore,
    pub render_complete: vk::Semaphore,
}

/// One acquire/render-complete pair per swapchain image.
pub struct SemaphoreSlots {
    device: ash::Device,
    pub slots: Vec<SemaphoreSlot>,
}

impl SemaphoreSlots {
    pub unsafe fn new(device: &ash::Device, count: usize) -> VkResult<Self> {
        let mut out = Self {
            device: device.clone(),
            slots: Vec::with_capacity(count),
        };
        let ci = vk::SemaphoreCreateInfo::default();
        for _ in 0..count {
            let acquire = device.create_semaphore(&ci, None)?;
            let render_complete = match device.create_semaphore(&ci, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(acquire, None);
                    return Err(e.into());
                }
            };
            out.slots.push(SemaphoreSlot {
                acquire,
                render_complete,
            });
        }
        debug!("created {} semaphore slots", count);
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for SemaphoreSlots {
    fn drop(&mut self) {
        unsafe {
            for s in &self.slots {
                self.device.destroy_semaphore(s.acquire, None);
                self.device.destroy_semaphore(s.render_complete, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_FRAMES_IN_FLIGHT;

    #[test]
    fn counters_wrap_independently() {
        let mut c = FrameCounters::new(2, 3);
        let mut frames = Vec::new();
        let mut sems = Vec::new();
        for _ in 0..7 {
            frames.push(c.frame());
            sems.push(c.semaphore());
            c.advance();
        }
        assert_eq!(frames, [0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(sems, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn reset_semaphores_restarts_at_zero() {
        let mut c = FrameCounters::new(2, 3);
        c.advance();
        c.advance();
        assert_eq!(c.semaphore(), 2);
        c.reset_semaphores(4);
        assert_eq!(c.semaphore(), 0);
        assert_eq!(c.frame(), 0);
        for _ in 0..4 {
            c.advance();
        }
        assert_eq!(c.semaphore(), 0);
    }

    fn order_err(r: VkResult<()>) -> (usize, SlotState, &'static str) {
        match r {
            Err(VkError::SlotOrder { slot, state, op }) => (slot, state, op),
            other => panic!("expected SlotOrder, got {other:?}"),
        }
    }

    #[test]
    fn begin_on_pending_slot_is_rejected() {
        let mut l = SlotLedger::new(MAX_FRAMES_IN_FLIGHT);
        l.begin(0).unwrap();
        l.submit(0).unwrap();
        // fence not yet observed: the slot may not be recorded again
        assert_eq!(order_err(l.begin(0)), (0, SlotState::Pending, "begin"));
        assert_eq!(l.state(0), SlotState::Pending);
        l.retire(0).unwrap();
        l.begin(0).unwrap();
    }

    #[test]
    fn ledger_rejects_out_of_order_steps() {
        let mut l = SlotLedger::new(2);
        assert_eq!(order_err(l.submit(0)), (0, SlotState::Available, "submit"));
        l.begin(0).unwrap();
        assert_eq!(order_err(l.begin(0)), (0, SlotState::Recording, "begin"));
        assert_eq!(order_err(l.retire(0)), (0, SlotState::Recording, "retire"));
        l.abandon(0).unwrap();
        assert_eq!(l.state(0), SlotState::Available);
    }

    #[test]
    fn skipping_the_fence_wait_cannot_overfill_slots() {
        let mut fl = FrameLoop::new(MAX_FRAMES_IN_FLIGHT, 3);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            fl.fence_signaled().unwrap();
            fl.acquired(SwapchainStatus::Optimal, false).unwrap();
            fl.submitted().unwrap();
            fl.presented(SwapchainStatus::Optimal, false);
        }
        assert_eq!(fl.busy(), MAX_FRAMES_IN_FLIGHT);
        // wrapped onto slot 0 without retiring it
        assert!(matches!(
            fl.acquired(SwapchainStatus::Optimal, false),
            Err(VkError::SlotOrder { slot: 0, state: SlotState::Pending, .. })
        ));
        assert_eq!(fl.busy(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn stale_acquire_leaves_slot_and_counters_alone() {
        for (status, resize) in [
            (SwapchainStatus::OutOfDate, false),
            (SwapchainStatus::OutOfDate, true),
            (SwapchainStatus::Suboptimal, true),
        ] {
            let mut fl = FrameLoop::new(2, 3);
            fl.fence_signaled().unwrap();
            assert_eq!(fl.acquired(status, resize).unwrap(), AcquireStep::Recreate);
            assert_eq!(fl.state(0), SlotState::Available, "{status:?}");
            assert_eq!((fl.frame(), fl.semaphore()), (0, 0), "{status:?}");
            fl.swapchain_rebuilt(4);
            assert_eq!((fl.frame(), fl.semaphore()), (0, 0));
        }
    }

    #[test]
    fn reset_is_granted_only_after_usable_acquire() {
        let mut fl = FrameLoop::new(2, 3);
        fl.fence_signaled().unwrap();
        assert_eq!(
            fl.acquired(SwapchainStatus::Suboptimal, false).unwrap(),
            AcquireStep::Record { frame: 0 }
        );
        assert_eq!(fl.state(0), SlotState::Recording);
    }

    #[test]
    fn present_advances_before_recreate() {
        let mut fl = FrameLoop::new(2, 3);
        fl.fence_signaled().unwrap();
        fl.acquired(SwapchainStatus::Optimal, true).unwrap();
        fl.submitted().unwrap();
        assert_eq!(
            fl.presented(SwapchainStatus::Optimal, true),
            FrameAction::Recreate
        );
        assert_eq!((fl.frame(), fl.semaphore()), (1, 1));
        fl.swapchain_rebuilt(2);
        assert_eq!((fl.frame(), fl.semaphore()), (1, 0));
        assert_eq!(fl.busy(), 0);
    }

    #[test]
    fn failed_submit_returns_slot_without_advancing() {
        let mut fl = FrameLoop::new(2, 3);
        fl.fence_signaled().unwrap();
        fl.acquired(SwapchainStatus::Optimal, false).unwrap();
        // record or submit failed: fence restored, ledger abandoned
        fl.abandoned().unwrap();
        assert_eq!(fl.state(0), SlotState::Available);
        assert_eq!((fl.frame(), fl.semaphore()), (0, 0));
        // the same slot is usable on the next frame
        fl.fence_signaled().unwrap();
        assert_eq!(
            fl.acquired(SwapchainStatus::Optimal, false).unwrap(),
            AcquireStep::Record { frame: 0 }
        );
    }

    #[test]
    fn fence_timeout_is_reported_not_retried() {
        let w = FenceWait::new(250_000_000, 250);
        assert!(w.check(Ok(())).is_ok());
        assert!(matches!(
            w.check(Err(vk::Result::TIMEOUT)),
            Err(VkError::FenceTimeout(250))
        ));
        assert!(matches!(
            w.check(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(VkError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn restored_fence_is_created_signaled() {
        let ci = signaled_fence_info();
        assert_eq!(ci.s_type, vk::StructureType::FENCE_CREATE_INFO);
        assert!(ci.flags.contains(vk::FenceCreateFlags::SIGNALED));
    }

    #[test]
    fn classify_results() {
        use SwapchainStatus::*;
        assert_eq!(SwapchainStatus::classify(Ok(false)).unwrap(), Optimal);
        assert_eq!(SwapchainStatus::classify(Ok(true)).unwrap(), Suboptimal);
        assert_eq!(
            SwapchainStatus::classify(Err(vk::Result::SUBOPTIMAL_KHR)).unwrap(),
            Suboptimal
        );
        assert_eq!(
            SwapchainStatus::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            OutOfDate
        );
        assert!(matches!(
            SwapchainStatus::classify(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(VkError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn acquire_decisions() {
        use FrameAction::*;
        use SwapchainStatus::*;
        assert_eq!(acquire_action(OutOfDate, false), Recreate);
        assert_eq!(acquire_action(OutOfDate, true), Recreate);
        assert_eq!(acquire_action(Suboptimal, true), Recreate);
        assert_eq!(acquire_action(Suboptimal, false), Continue);
        assert_eq!(acquire_action(Optimal, false), Continue);
        assert_eq!(acquire_action(Optimal, true), Continue);
    }

    #[test]
    fn present_decisions() {
        use FrameAction::*;
        use SwapchainStatus::*;
        assert_eq!(present_action(OutOfDate, false), Recreate);
        assert_eq!(present_action(Suboptimal, true), Recreate);
        assert_eq!(present_action(Suboptimal, false), Continue);
        assert_eq!(present_action(Optimal, false), Continue);
        assert_eq!(present_action(Optimal, true), Recreate);
    }
}
