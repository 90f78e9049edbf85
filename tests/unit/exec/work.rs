use super::*;
use crate::foundation::core::ImageBuf;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;

/// Writes the row index into every element of its band.
struct RowFill {
    calls: AtomicUsize,
    threads: Mutex<Vec<String>>,
}

impl RowFill {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            threads: Mutex::new(Vec::new()),
        }
    }
}

impl WriteJob for RowFill {
    fn run(&self, pkg: &WorkPackage, target: Option<RowsMut<'_>>) -> TesseraResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(name) = std::thread::current().name() {
            self.threads.lock().unwrap().push(name.to_string());
        }
        let mut rows = target.ok_or_else(|| TesseraError::invariant("no target"))?;
        for y in pkg.rect.y0..pkg.rect.y1 {
            rows.row_mut(y).fill(y as f32 + pkg.pass as f32 * 100.0);
        }
        Ok(())
    }
}

struct Failing;

impl WriteJob for Failing {
    fn run(&self, pkg: &WorkPackage, _target: Option<RowsMut<'_>>) -> TesseraResult<()> {
        if pkg.rect.y0 == 0 {
            return Err(TesseraError::device("boom"));
        }
        Ok(())
    }
}

fn schedule_bands(s: &mut WorkScheduler, rect: PixelRect, n: usize, passes: u32) {
    for r in rect.split_rows(n) {
        s.schedule(WorkPackage::new(r, passes));
    }
}

#[test]
fn package_state_machine() {
    let mut p = WorkPackage::new(PixelRect::from_size(4, 4), 2);
    assert_eq!(p.state(), WorkState::Pending);
    assert!(p.reset_for_pass(1).is_err());
    p.reset_for_pass(0).unwrap();
    p.start().unwrap();
    assert!(p.start().is_err());
    assert!(p.reset_for_pass(1).is_err());
    p.complete().unwrap();
    assert!(p.is_finished());
    assert!(p.reset_for_pass(2).is_err());
    p.reset_for_pass(1).unwrap();
    assert_eq!(p.state(), WorkState::Pending);
    assert_eq!(p.pass, 1);
}

#[test]
fn zero_threads_is_rejected() {
    assert!(WorkScheduler::new(0).is_err());
}

#[test]
fn synchronous_mode_runs_on_the_caller() {
    let mut s = WorkScheduler::new(1).unwrap();
    let mut img = ImageBuf::new(3, 6, 1);
    schedule_bands(&mut s, PixelRect::from_size(3, 6), 3, 1);
    assert_eq!(s.pending(), 3);

    let job = RowFill::new();
    let pkgs = s
        .finish(&job, Some(RowsMut::of_image(&mut img).unwrap()))
        .unwrap();
    assert_eq!(pkgs.len(), 3);
    assert!(pkgs.iter().all(WorkPackage::is_finished));
    assert_eq!(s.pending(), 0);
    assert_eq!(img.pixel(2, 5), &[5.0]);
    assert!(job.threads.lock().unwrap().iter().all(|n| !n.starts_with("tessera-worker")));
}

#[test]
fn pool_writes_disjoint_bands_in_parallel() {
    let mut s = WorkScheduler::new(4).unwrap();
    let mut img = ImageBuf::new(5, 17, 1);
    schedule_bands(&mut s, PixelRect::from_size(5, 17), 4, 1);

    let job = RowFill::new();
    s.finish(&job, Some(RowsMut::of_image(&mut img).unwrap()))
        .unwrap();
    assert_eq!(job.calls.load(Ordering::SeqCst), 4);
    for y in 0..17 {
        assert_eq!(img.pixel(0, y), &[y as f32]);
    }
    assert!(job.threads.lock().unwrap().iter().all(|n| n.starts_with("tessera-worker")));
    s.stop();
}

#[test]
fn packages_are_reused_across_passes() {
    let mut s = WorkScheduler::new(2).unwrap();
    let mut img = ImageBuf::new(2, 4, 1);
    schedule_bands(&mut s, PixelRect::from_size(2, 4), 2, 2);
    let job = RowFill::new();

    let mut pkgs = s
        .finish(&job, Some(RowsMut::of_image(&mut img).unwrap()))
        .unwrap();
    for mut p in pkgs.drain(..) {
        p.reset_for_pass(1).unwrap();
        s.schedule(p);
    }
    s.finish(&job, Some(RowsMut::of_image(&mut img).unwrap()))
        .unwrap();
    assert_eq!(img.pixel(1, 3), &[103.0]);
}

#[test]
fn a_failing_package_fails_the_drain() {
    let mut s = WorkScheduler::new(2).unwrap();
    schedule_bands(&mut s, PixelRect::from_size(2, 4), 2, 1);
    let err = s.finish(&Failing, None).unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[test]
fn overlapping_rects_are_rejected_before_running() {
    let mut s = WorkScheduler::new(1).unwrap();
    s.schedule(WorkPackage::new(PixelRect::new(0, 0, 2, 3).unwrap(), 1));
    s.schedule(WorkPackage::new(PixelRect::new(0, 2, 2, 4).unwrap(), 1));
    let mut img = ImageBuf::new(2, 4, 1);
    let job = RowFill::new();
    assert!(
        s.finish(&job, Some(RowsMut::of_image(&mut img).unwrap()))
            .unwrap_err()
            .is_invariant()
    );
    assert_eq!(job.calls.load(Ordering::SeqCst), 0);
}
