use super::*;

#[test]
fn host_view_rejects_short_storage() {
    let data = vec![0.0; 10];
    assert!(HostView::new(&data, 3, 3, 1, 3).is_ok());
    assert!(HostView::new(&data, 3, 3, 1, 4).is_err());
    assert!(HostView::new(&data, 4, 1, 1, 3).is_err());
}

#[test]
fn host_view_samples_clamped_with_padded_pitch() {
    // 2x2, one channel, pitch of 4 elements.
    let data = vec![1.0, 2.0, -1.0, -1.0, 3.0, 4.0];
    let v = HostView::new(&data, 2, 2, 1, 4).unwrap();
    assert_eq!(v.pixel(1, 1), &[4.0]);
    assert_eq!(v.sample_clamped(-5, 0), &[1.0]);
    assert_eq!(v.sample_clamped(9, 9), &[4.0]);
    assert_eq!(v.to_image().data, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn split_bands_uses_absolute_rows() {
    let mut data = vec![0.0; 2 * 6];
    let rows = RowsMut::new(&mut data, 2, 6, 1, 2).unwrap();
    let rects = PixelRect::from_size(2, 6).split_rows(3);
    let mut bands = rows.split_bands(&rects).unwrap();
    assert_eq!(bands.len(), 3);
    for band in &mut bands {
        let (y0, y1) = (band.y0(), band.y1());
        for y in y0..y1 {
            band.pixel_mut(1, y)[0] = y as f32;
        }
    }
    drop(bands);
    assert_eq!(data, vec![0.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0, 5.0]);
}

#[test]
fn split_bands_skips_rows_outside_rects() {
    let mut data = vec![0.0; 8];
    let rows = RowsMut::new(&mut data, 1, 8, 1, 1).unwrap();
    let rects = [
        PixelRect::new(0, 2, 1, 4).unwrap(),
        PixelRect::new(0, 6, 1, 7).unwrap(),
    ];
    let mut bands = rows.split_bands(&rects).unwrap();
    bands[0].pixel_mut(0, 3)[0] = 3.0;
    bands[1].pixel_mut(0, 6)[0] = 6.0;
    drop(bands);
    assert_eq!(data, vec![0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 6.0, 0.0]);
}

#[test]
fn split_bands_rejects_overlap() {
    let mut data = vec![0.0; 8];
    let rows = RowsMut::new(&mut data, 1, 8, 1, 1).unwrap();
    let rects = [
        PixelRect::new(0, 0, 1, 4).unwrap(),
        PixelRect::new(0, 3, 1, 8).unwrap(),
    ];
    assert!(rows.split_bands(&rects).unwrap_err().is_invariant());
}

#[test]
fn input_set_reports_missing_socket() {
    let value = [0.5f32];
    let set = InputSet::new(vec![InputPixels::SingleElement(&value)]);
    assert_eq!(set.get(0).unwrap().sample(100, -3), &[0.5]);
    assert!(set.get(1).unwrap_err().is_invariant());
}

#[test]
fn buffer_type_write_policy() {
    assert!(BufferType::Temporal.writes());
    assert!(BufferType::Cached.writes());
    assert!(BufferType::NoBufferWithWrite.writes());
    assert!(!BufferType::Custom.writes());
    assert!(!BufferType::NoBufferNoWrite.writes());
}
