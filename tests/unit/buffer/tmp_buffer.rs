use super::*;
use crate::device::sim::SimDevice;

fn exec_id() -> Arc<str> {
    Arc::from("exec-test")
}

fn device_mem(dev: &mut SimDevice, id: u64, w: u32, h: u32, mappable: bool) -> DeviceMem {
    DeviceMem {
        id: AllocId(id),
        handle: dev.alloc(w, h, 1, mappable).unwrap(),
        width: w,
        height: h,
        channels: 1,
        host_mappable: mappable,
    }
}

#[test]
fn host_relayout_zeroes_and_keeps_capacity() {
    let mut m = HostMem::owned(AllocId(1), 4, 4, 1);
    m.rows_mut(4, 4, 1).unwrap().row_mut(0).fill(3.0);
    m.relayout(2, 2, 2).unwrap();
    assert_eq!(m.capacity(), 16);
    assert_eq!(m.row_pitch, 4);
    assert!(m.view(2, 2, 2).unwrap().row(0).iter().all(|v| *v == 0.0));
    assert!(m.relayout(5, 4, 1).is_err());
}

#[test]
fn external_memory_is_never_recyclable() {
    let ext = HostMem::external(vec![0.0; 4], 2, 2, 1);
    assert!(!ext.is_recyclable());
    let shared = HostMem::shared(Arc::new(ImageBuf::new(2, 2, 1)));
    assert!(!shared.is_recyclable());
    assert!(HostMem::owned(AllocId(7), 1, 1, 1).is_recyclable());
}

#[test]
fn reading_a_cleared_host_facet_is_rejected() {
    let mut b = TmpBuffer::new(2, 2, 1, exec_id());
    assert!(b.host_view().is_err());
    b.attach_host(HostMem::owned(AllocId(1), 2, 2, 1), false)
        .unwrap();
    assert!(b.host_view().unwrap_err().is_invariant());
    b.host_target_mut().unwrap().pixel_mut(1, 1)[0] = 4.0;
    b.mark_host_filled().unwrap();
    assert_eq!(b.host_view().unwrap().pixel(1, 1), &[4.0]);
}

#[test]
fn attaching_twice_or_too_small_fails() {
    let mut b = TmpBuffer::new(4, 4, 1, exec_id());
    assert!(
        b.attach_host(HostMem::owned(AllocId(1), 2, 2, 1), false)
            .is_err()
    );
    b.attach_host(HostMem::owned(AllocId(2), 4, 4, 1), false)
        .unwrap();
    assert!(
        b.attach_host(HostMem::owned(AllocId(3), 4, 4, 1), false)
            .is_err()
    );
}

#[test]
fn map_sets_host_aside_and_unmap_restores_it() {
    let mut dev = SimDevice::new();
    let mut b = TmpBuffer::new(2, 2, 1, exec_id());
    b.attach_host(HostMem::owned(AllocId(1), 2, 2, 1), false)
        .unwrap();
    b.attach_device(device_mem(&mut dev, 2, 2, 2, true))
        .unwrap();
    b.mark_device_filled().unwrap();

    b.map_device_to_host(&mut dev).unwrap();
    assert_eq!(b.host_state(), "mapped-from-device");
    assert_eq!(b.device_state(), "mapped-to-host");
    assert!(b.orig_host.is_some());
    b.check_facets().unwrap();
    assert!(b.device_handle().is_err());

    b.host_target_mut().unwrap().pixel_mut(0, 1)[0] = 9.0;
    b.unmap(&mut dev).unwrap();
    assert_eq!(b.host_state(), "cleared");
    assert_eq!(b.device_state(), "filled");
    b.check_facets().unwrap();

    let handle = b.device_handle().unwrap();
    assert_eq!(dev.snapshot(handle).unwrap(), vec![0.0, 0.0, 9.0, 0.0]);
}

#[test]
fn plain_device_memory_cannot_be_mapped() {
    let mut dev = SimDevice::new();
    let mut b = TmpBuffer::new(2, 2, 1, exec_id());
    b.attach_device(device_mem(&mut dev, 1, 2, 2, false))
        .unwrap();
    b.mark_device_filled().unwrap();
    assert!(b.map_device_to_host(&mut dev).unwrap_err().is_invariant());
    assert_eq!(b.device_state(), "filled");
}

#[test]
fn upload_then_download_round_trips_through_padded_pitch() {
    let mut dev = SimDevice::new();
    let mut src = TmpBuffer::new(3, 2, 1, exec_id());
    let img = Arc::new(ImageBuf::from_fn(3, 2, 1, |x, y, px| {
        px[0] = (x * 10 + y) as f32
    }));
    src.attach_host(HostMem::shared(Arc::clone(&img)), true)
        .unwrap();
    src.attach_device(device_mem(&mut dev, 1, 3, 2, false))
        .unwrap();
    src.upload(&mut dev).unwrap();
    assert_eq!(dev.pending_commands(), 1);

    let mut dst = TmpBuffer::new(3, 2, 1, exec_id());
    let DeviceFacet::Filled(mem) = src.device else {
        panic!("upload leaves the device facet filled");
    };
    dst.attach_device(mem).unwrap();
    dst.mark_device_filled().unwrap();
    dst.attach_host(HostMem::owned(AllocId(2), 3, 2, 1), false)
        .unwrap();
    dst.download(&mut dev).unwrap();
    assert_eq!(dst.host_view().unwrap().to_image(), *img);
}

#[test]
fn half_mapped_states_are_detected() {
    let mut b = TmpBuffer::new(1, 1, 1, exec_id());
    b.device = DeviceFacet::MappedToHost(DeviceHandle(3));
    assert!(b.check_facets().unwrap_err().is_invariant());
}

#[test]
fn parts_split_mapped_and_saved_memory() {
    let mut dev = SimDevice::new();
    let mut b = TmpBuffer::new(2, 2, 1, exec_id());
    b.attach_host(HostMem::owned(AllocId(1), 2, 2, 1), true)
        .unwrap();
    b.attach_device(device_mem(&mut dev, 2, 2, 2, true))
        .unwrap();
    b.mark_device_filled().unwrap();
    b.map_device_to_host(&mut dev).unwrap();

    let parts = b.into_parts();
    assert!(parts.host.is_none());
    assert!(parts.device.is_none());
    assert_eq!(parts.mapped.map(|m| m.device.id), Some(AllocId(2)));
    assert_eq!(parts.orig_host.and_then(|m| m.id), Some(AllocId(1)));
}
