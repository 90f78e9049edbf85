use super::*;
use crate::foundation::core::ImageBuf;

fn copy_kernel(dev: &mut SimDevice) {
    dev.register_kernel("copy_plus", |k: &mut SimKernelCtx<'_>| {
        let add = k.float_param(0)?;
        let src = k.inputs[0];
        for y in k.rect.y0..k.rect.y1 {
            for x in k.rect.x0..k.rect.x1 {
                let px = src.sample(i64::from(x), i64::from(y));
                for (o, s) in k.output.pixel_mut(x, y).iter_mut().zip(px) {
                    *o = s + add;
                }
            }
        }
        Ok(())
    });
}

#[test]
fn row_pitch_is_padded() {
    let mut dev = SimDevice::new();
    let h = dev.alloc(3, 2, 1, true).unwrap();
    let m = dev.map_to_host(h).unwrap();
    assert_eq!(m.row_pitch, 16);
    assert_eq!(m.data.len(), 32);
    dev.unmap(h, m).unwrap();
    dev.wait_queue_to_finish().unwrap();
    assert_eq!(dev.mapped_allocations(), 0);
}

#[test]
fn enqueued_commands_run_only_on_drain() {
    let mut dev = SimDevice::new();
    copy_kernel(&mut dev);
    let src = dev.alloc(2, 2, 1, false).unwrap();
    let dst = dev.alloc(2, 2, 1, false).unwrap();
    let img = ImageBuf::from_fn(2, 2, 1, |x, y, px| px[0] = (x + 2 * y) as f32);
    dev.write_from_host(src, HostView::of_image(&img).unwrap())
        .unwrap();
    dev.enqueue_kernel(KernelLaunch {
        name: "copy_plus".into(),
        rect: PixelRect::from_size(2, 2),
        pass: 0,
        args: vec![
            KernelArg::Output(dst),
            KernelArg::Input(src),
            KernelArg::Float(10.0),
        ],
    })
    .unwrap();
    assert_eq!(dev.pending_commands(), 2);

    let mut out = ImageBuf::new(2, 2, 1);
    dev.read_to_host(dst, RowsMut::of_image(&mut out).unwrap())
        .unwrap();
    assert_eq!(dev.pending_commands(), 0);
    assert_eq!(out.data, vec![10.0, 11.0, 12.0, 13.0]);
    assert_eq!(dev.stats().kernels, 1);
    assert_eq!(dev.stats().writes_from_host, 1);
}

#[test]
fn mapping_moves_storage_to_host() {
    let mut dev = SimDevice::new();
    let h = dev.alloc(2, 1, 1, true).unwrap();
    let mut m = dev.map_to_host(h).unwrap();
    m.data[1] = 5.0;
    assert!(dev.map_to_host(h).is_err());
    assert!(dev.free(h).is_err());
    dev.unmap(h, m).unwrap();
    assert_eq!(dev.snapshot(h).unwrap(), vec![0.0, 5.0]);
    dev.free(h).unwrap();
    assert_eq!(dev.live_allocations(), 0);
}

#[test]
fn plain_allocations_are_not_mappable() {
    let mut dev = SimDevice::new();
    let h = dev.alloc(4, 4, 4, false).unwrap();
    let err = dev.map_to_host(h).unwrap_err();
    assert!(err.to_string().starts_with("device error:"));
}

#[test]
fn unknown_kernels_and_oversized_images_are_rejected() {
    let mut dev = SimDevice::new().with_max_image_size(8, 8);
    assert!(dev.alloc(9, 1, 1, false).is_err());
    let h = dev.alloc(8, 8, 1, false).unwrap();
    let launch = KernelLaunch {
        name: "nope".into(),
        rect: PixelRect::from_size(8, 8),
        pass: 0,
        args: vec![KernelArg::Output(h)],
    };
    assert!(dev.enqueue_kernel(launch).is_err());
}

#[test]
fn kernel_params_are_typed() {
    let mut dev = SimDevice::new();
    dev.register_kernel("int_fill", |k: &mut SimKernelCtx<'_>| {
        let v = k.int_param(0)? as f32;
        assert!(k.float_param(0).is_err());
        for y in k.rect.y0..k.rect.y1 {
            k.output.row_mut(y).fill(v);
        }
        Ok(())
    });
    let h = dev.alloc(2, 2, 1, false).unwrap();
    dev.enqueue_kernel(KernelLaunch {
        name: "int_fill".into(),
        rect: PixelRect::new(0, 1, 2, 2).unwrap(),
        pass: 0,
        args: vec![KernelArg::Output(h), KernelArg::Int(7)],
    })
    .unwrap();
    dev.wait_queue_to_finish().unwrap();
    assert_eq!(dev.snapshot(h).unwrap(), vec![0.0, 0.0, 7.0, 7.0]);
}

#[test]
fn clear_zeroes_after_earlier_commands() {
    let mut dev = SimDevice::new();
    let h = dev.alloc(2, 2, 1, false).unwrap();
    let img = ImageBuf::from_fn(2, 2, 1, |_, _, px| px[0] = 5.0);
    dev.write_from_host(h, HostView::of_image(&img).unwrap())
        .unwrap();
    dev.clear(h).unwrap();
    assert_eq!(dev.pending_commands(), 2);
    assert_eq!(dev.snapshot(h).unwrap(), vec![0.0; 4]);
    assert_eq!(dev.stats().clears, 1);
    assert!(dev.clear(DeviceHandle(99)).is_err());
}
