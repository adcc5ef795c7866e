//! The per-tick frame loop.
//!
//! [`FrameDriver`] owns the slot counter and decides when to wait, acquire,
//! record, submit, present and recreate. The GPU work itself sits behind
//! [`FrameBackend`], implemented for Vulkan by
//! [`crate::renderer::Renderer`].

use tracing::{debug, info, info_span, trace, Span};

use crate::error::Result;
use crate::window::{Event, EventSource, KeyCode, WindowState};

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. `suboptimal` images are still rendered and presented.
    Image { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be rebuilt.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; the swapchain should be rebuilt.
    NeedsRecreate,
}

/// GPU side of one frame, split into the steps the driver sequences.
pub trait FrameBackend {
    /// Block until the slot's previous submission has finished.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Unsignal the slot's fence ahead of a new submission.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Submit the slot's commands, signaling its fence on completion.
    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Rebuild the swapchain and everything derived from it.
    fn recreate_surface(&mut self, framebuffer_size: (u32, u32)) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Window minimized; nothing was touched.
    Skipped,
    /// Acquire reported an out-of-date swapchain; the slot did not advance.
    Abandoned,
    Presented {
        slot: usize,
        image_index: u32,
        surface_recreated: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub ticks: u64,
    pub skipped: u64,
    pub abandoned: u64,
    pub presented: u64,
    pub recreations: u64,
}

/// Drives a [`FrameBackend`] through frames-in-flight rendering.
///
/// At most `frames_in_flight` submissions are outstanding: every slot is
/// waited on before it is reused.
pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    frames_in_flight: usize,
    slot: usize,
    pending_recreate: bool,
    running: bool,
    stats: FrameStats,
    span: Span,
}

impl<B: FrameBackend> FrameDriver<B> {
    /// `frames_in_flight` must match the number of slots the backend owns.
    pub fn new(backend: B, frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame must be in flight");
        Self {
            backend,
            frames_in_flight,
            slot: 0,
            pending_recreate: false,
            running: false,
            stats: FrameStats::default(),
            span: info_span!("frame_driver", frames_in_flight),
        }
    }

    /// Run one frame.
    pub fn tick(&mut self, window: &impl WindowState) -> Result<TickOutcome> {
        let span = self.span.clone();
        let _guard = span.enter();
        self.stats.ticks += 1;

        if window.is_minimized() {
            self.stats.skipped += 1;
            return Ok(TickOutcome::Skipped);
        }

        if self.pending_recreate {
            self.recreate(window)?;
        }

        let slot = self.slot;
        self.backend.wait_for_slot(slot)?;

        let image_index = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Image {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    trace!(slot, image_index, "acquired suboptimal image");
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                debug!(slot, "swapchain out of date at acquire");
                // the fence stays signaled, so the retry does not block
                self.recreate(window)?;
                self.stats.abandoned += 1;
                return Ok(TickOutcome::Abandoned);
            }
        };

        self.backend.reset_slot(slot)?;
        self.backend.record(slot, image_index)?;
        self.backend.submit(slot)?;

        let surface_recreated = match self.backend.present(slot, image_index)? {
            PresentOutcome::Presented => false,
            PresentOutcome::NeedsRecreate => {
                debug!(slot, "swapchain out of date or suboptimal at present");
                self.recreate(window)?;
                true
            }
        };

        self.slot = (slot + 1) % self.frames_in_flight;
        self.stats.presented += 1;
        Ok(TickOutcome::Presented {
            slot,
            image_index,
            surface_recreated,
        })
    }

    /// Recreate now, or once the window has a drawable size again.
    fn recreate(&mut self, window: &impl WindowState) -> Result<()> {
        if window.is_minimized() {
            self.pending_recreate = true;
            return Ok(());
        }
        self.backend.recreate_surface(window.framebuffer_size())?;
        self.pending_recreate = false;
        self.stats.recreations += 1;
        Ok(())
    }

    /// Poll, handle input and tick until the window closes or [`Self::stop`]
    /// is called. Waits for the device to go idle before returning.
    pub fn run<W: WindowState + EventSource>(&mut self, window: &mut W) -> Result<()> {
        info!(parent: &self.span, "entering frame loop");
        self.running = true;

        while self.running && !window.should_close() {
            window.poll_events();
            for event in window.drain_events() {
                self.handle_event(event);
            }
            if !self.running {
                break;
            }
            self.tick(window)?;
        }

        self.running = false;
        info!(parent: &self.span, stats = ?self.stats, "frame loop finished");
        self.backend.wait_idle()
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::KeyPressed(KeyCode::Escape) | Event::CloseRequested => self.stop(),
            Event::Resized { width, height } => {
                debug!(parent: &self.span, width, height, "window resized");
            }
            _ => {}
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Slot the next tick will use.
    pub fn current_slot(&self) -> usize {
        self.slot
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use ash::vk;
    use std::cell::Cell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate((u32, u32)),
        WaitIdle,
    }

    /// Records calls and tracks fences the way the GPU would if every
    /// submission finished by the next wait.
    struct FakeBackend {
        calls: Vec<Call>,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        fence_signaled: Vec<bool>,
        outstanding: usize,
        max_outstanding: usize,
        frames_in_flight: usize,
        next_image: u32,
    }

    impl FakeBackend {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                calls: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fence_signaled: vec![true; frames_in_flight],
                outstanding: 0,
                max_outstanding: 0,
                frames_in_flight,
                next_image: 0,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for FakeBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            if !self.fence_signaled[slot] {
                // the wait retires that slot's submission
                self.fence_signaled[slot] = true;
                self.outstanding -= 1;
            }
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_script.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                AcquireOutcome::Image {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            assert!(self.fence_signaled[slot], "reset before wait on slot {slot}");
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            self.outstanding += 1;
            self.max_outstanding = self.max_outstanding.max(self.outstanding);
            assert!(self.outstanding <= self.frames_in_flight);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_surface(&mut self, framebuffer_size: (u32, u32)) -> Result<()> {
            self.calls.push(Call::Recreate(framebuffer_size));
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    struct FakeWindow {
        size: Cell<(u32, u32)>,
        polls: VecDeque<Vec<Event>>,
        pending: Vec<Event>,
        closed: bool,
    }

    impl FakeWindow {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: Cell::new((width, height)),
                polls: VecDeque::new(),
                pending: Vec::new(),
                closed: false,
            }
        }
    }

    impl WindowState for FakeWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.size.get()
        }
    }

    impl EventSource for FakeWindow {
        fn poll_events(&mut self) {
            if let Some(events) = self.polls.pop_front() {
                self.pending.extend(events);
            }
        }

        fn should_close(&self) -> bool {
            self.closed
        }

        fn drain_events(&mut self) -> Vec<Event> {
            std::mem::take(&mut self.pending)
        }
    }

    #[test]
    fn tick_runs_steps_in_order() {
        let mut driver = FrameDriver::new(FakeBackend::new(2), 2);
        let window = FakeWindow::new(800, 600);

        let outcome = driver.tick(&window).unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Presented {
                slot: 0,
                image_index: 0,
                surface_recreated: false
            }
        );
        assert_eq!(
            driver.backend().calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(driver.current_slot(), 1);
    }

    #[test]
    fn slots_rotate_and_never_exceed_frames_in_flight() {
        for frames_in_flight in 1..=4 {
            let mut driver = FrameDriver::new(FakeBackend::new(frames_in_flight), frames_in_flight);
            let window = FakeWindow::new(800, 600);
            for _ in 0..10 {
                driver.tick(&window).unwrap();
            }

            let backend = driver.backend();
            assert!(backend.max_outstanding <= frames_in_flight);

            // every submit on a slot is preceded by a wait on that slot since
            // its previous submit
            let mut waited = vec![false; frames_in_flight];
            for call in &backend.calls {
                match *call {
                    Call::Wait(slot) => waited[slot] = true,
                    Call::Submit(slot) => {
                        assert!(waited[slot]);
                        waited[slot] = false;
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn minimized_ticks_touch_nothing() {
        let mut driver = FrameDriver::new(FakeBackend::new(2), 2);
        let window = FakeWindow::new(800, 600);
        driver.tick(&window).unwrap();
        let calls_before = driver.backend().calls.len();

        window.size.set((0, 0));
        for _ in 0..5 {
            assert_eq!(driver.tick(&window).unwrap(), TickOutcome::Skipped);
        }
        assert_eq!(driver.backend().calls.len(), calls_before);
        assert_eq!(driver.current_slot(), 1);
        assert_eq!(driver.stats().skipped, 5);

        window.size.set((800, 600));
        driver.tick(&window).unwrap();
        assert_eq!(driver.backend().calls[calls_before], Call::Wait(1));
    }

    #[test]
    fn out_of_date_acquire_recreates_once_without_advancing() {
        let mut backend = FakeBackend::new(2);
        backend.acquire_script = VecDeque::from([
            AcquireOutcome::Image {
                image_index: 0,
                suboptimal: false,
            },
            AcquireOutcome::OutOfDate,
            AcquireOutcome::Image {
                image_index: 1,
                suboptimal: false,
            },
        ]);
        let mut driver = FrameDriver::new(backend, 2);
        let window = FakeWindow::new(1024, 768);

        driver.tick(&window).unwrap();
        assert_eq!(driver.tick(&window).unwrap(), TickOutcome::Abandoned);
        assert_eq!(driver.current_slot(), 1);
        driver.tick(&window).unwrap();

        let calls = &driver.backend().calls;
        assert_eq!(
            calls[6..],
            [
                Call::Wait(1),
                Call::Acquire(1),
                Call::Recreate((1024, 768)),
                Call::Wait(1),
                Call::Acquire(1),
                Call::Reset(1),
                Call::Record(1, 1),
                Call::Submit(1),
                Call::Present(1, 1),
            ]
        );
        assert_eq!(driver.backend().count(|c| matches!(c, Call::Recreate(_))), 1);
        assert_eq!(driver.current_slot(), 0);
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut backend = FakeBackend::new(2);
        backend.acquire_script = VecDeque::from([AcquireOutcome::Image {
            image_index: 2,
            suboptimal: true,
        }]);
        let mut driver = FrameDriver::new(backend, 2);
        let outcome = driver.tick(&FakeWindow::new(640, 480)).unwrap();
        assert!(matches!(outcome, TickOutcome::Presented { image_index: 2, .. }));
        assert_eq!(driver.backend().count(|c| matches!(c, Call::Recreate(_))), 0);
    }

    #[test]
    fn present_signal_recreates_after_the_frame() {
        let mut backend = FakeBackend::new(2);
        backend.present_script = VecDeque::from([PresentOutcome::NeedsRecreate]);
        let mut driver = FrameDriver::new(backend, 2);

        let outcome = driver.tick(&FakeWindow::new(640, 480)).unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Presented {
                slot: 0,
                image_index: 0,
                surface_recreated: true
            }
        );
        assert_eq!(
            driver.backend().calls.last(),
            Some(&Call::Recreate((640, 480)))
        );
        assert_eq!(driver.current_slot(), 1);
    }

    #[test]
    fn recreate_is_deferred_while_minimized() {
        struct ShrinkOnAcquire<'a> {
            inner: FakeBackend,
            window: &'a FakeWindow,
        }

        impl FrameBackend for ShrinkOnAcquire<'_> {
            fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
                self.inner.wait_for_slot(slot)
            }
            fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
                // the window got minimized between the idle check and acquire
                self.window.size.set((0, 0));
                self.inner.calls.push(Call::Acquire(slot));
                Ok(AcquireOutcome::OutOfDate)
            }
            fn reset_slot(&mut self, slot: usize) -> Result<()> {
                self.inner.reset_slot(slot)
            }
            fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
                self.inner.record(slot, image_index)
            }
            fn submit(&mut self, slot: usize) -> Result<()> {
                self.inner.submit(slot)
            }
            fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
                self.inner.present(slot, image_index)
            }
            fn recreate_surface(&mut self, size: (u32, u32)) -> Result<()> {
                self.inner.recreate_surface(size)
            }
            fn wait_idle(&mut self) -> Result<()> {
                self.inner.wait_idle()
            }
        }

        let window = FakeWindow::new(800, 600);
        let backend = ShrinkOnAcquire {
            inner: FakeBackend::new(2),
            window: &window,
        };
        let mut driver = FrameDriver::new(backend, 2);

        assert_eq!(driver.tick(&window).unwrap(), TickOutcome::Abandoned);
        assert_eq!(driver.backend().inner.count(|c| matches!(c, Call::Recreate(_))), 0);

        // restored: the deferred recreate happens before the next wait
        window.size.set((1280, 720));
        let _ = driver.tick(&window).unwrap();
        let calls = &driver.backend().inner.calls;
        assert_eq!(calls[2], Call::Recreate((1280, 720)));
        assert_eq!(calls[3], Call::Wait(0));
    }

    #[test]
    fn fatal_errors_propagate() {
        struct Lost;
        impl FrameBackend for Lost {
            fn wait_for_slot(&mut self, _: usize) -> Result<()> {
                Err(RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
            }
            fn acquire_image(&mut self, _: usize) -> Result<AcquireOutcome> {
                unreachable!()
            }
            fn reset_slot(&mut self, _: usize) -> Result<()> {
                unreachable!()
            }
            fn record(&mut self, _: usize, _: u32) -> Result<()> {
                unreachable!()
            }
            fn submit(&mut self, _: usize) -> Result<()> {
                unreachable!()
            }
            fn present(&mut self, _: usize, _: u32) -> Result<PresentOutcome> {
                unreachable!()
            }
            fn recreate_surface(&mut self, _: (u32, u32)) -> Result<()> {
                unreachable!()
            }
            fn wait_idle(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let mut driver = FrameDriver::new(Lost, 2);
        let err = driver.tick(&FakeWindow::new(10, 10)).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert_eq!(driver.current_slot(), 0);
    }

    #[test]
    fn run_stops_on_escape_and_waits_idle() {
        let mut window = FakeWindow::new(800, 600);
        window.polls = VecDeque::from([
            vec![Event::Resized {
                width: 800,
                height: 600,
            }],
            vec![],
            vec![Event::KeyPressed(KeyCode::Escape)],
        ]);
        let mut driver = FrameDriver::new(FakeBackend::new(2), 2);

        driver.run(&mut window).unwrap();

        let backend = driver.backend();
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 2);
        assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
        assert!(!driver.is_running());
    }

    #[test]
    fn run_exits_when_window_closes() {
        let mut window = FakeWindow::new(800, 600);
        window.closed = true;
        let mut driver = FrameDriver::new(FakeBackend::new(2), 2);
        driver.run(&mut window).unwrap();
        assert_eq!(driver.backend().calls, vec![Call::WaitIdle]);
    }
}
