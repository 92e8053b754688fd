//! Integration tests for the BGRA to NV12 converter and image adjustments

mod mocks;

use mocks::{bt601_reference, checkerboard_4x2, gradient_bgra, pixel, solid_bgra, PALETTE};
use rtspcam_core::convert::{
    apply_brightness_contrast, apply_flip, convert_to_nv12, convert_to_nv12_into, ImageAdjustments,
};
use rtspcam_core::error::RtspCamError;
use rtspcam_core::formats::PixelLayout;

#[test]
fn test_checkerboard_end_to_end() {
    let bgra = checkerboard_4x2();
    let nv12 = convert_to_nv12(&bgra, 4, 2).unwrap();

    assert_eq!(nv12.len(), 12);
    assert_eq!(&nv12[..8], &[82, 144, 41, 235, 144, 82, 235, 41]);
    // Top-left of each 2x2 block: red, then blue
    assert_eq!(&nv12[8..], &[90, 240, 240, 110]);
}

#[test]
fn test_palette_matches_bt601() {
    for (name, rgb) in PALETTE {
        let bgra = solid_bgra(4, 4, [rgb[2], rgb[1], rgb[0], 255]);
        let nv12 = convert_to_nv12(&bgra, 4, 4).unwrap();
        let (y, u, v) = bt601_reference(*rgb);

        for &luma in &nv12[..16] {
            assert!(
                (luma as f64 - y).abs() <= 2.0,
                "{}: luma {} vs {:.1}",
                name,
                luma,
                y
            );
        }
        for pair in nv12[16..].chunks_exact(2) {
            assert!((pair[0] as f64 - u).abs() <= 2.0, "{}: U {} vs {:.1}", name, pair[0], u);
            assert!((pair[1] as f64 - v).abs() <= 2.0, "{}: V {} vs {:.1}", name, pair[1], v);
        }
    }
}

#[test]
fn test_alpha_is_ignored() {
    let opaque = convert_to_nv12(&solid_bgra(2, 2, [10, 20, 30, 255]), 2, 2).unwrap();
    let clear = convert_to_nv12(&solid_bgra(2, 2, [10, 20, 30, 0]), 2, 2).unwrap();
    assert_eq!(opaque, clear);
}

#[test]
fn test_convert_rejects_odd_and_short_input() {
    assert!(convert_to_nv12(&solid_bgra(3, 2, [0, 0, 0, 255]), 3, 2).is_err());
    assert!(convert_to_nv12(&solid_bgra(2, 3, [0, 0, 0, 255]), 2, 3).is_err());
    assert!(convert_to_nv12(&[0u8; 8], 2, 2).is_err());

    let mut small = vec![0u8; 4];
    assert!(convert_to_nv12_into(&solid_bgra(2, 2, [0; 4]), &mut small, 2, 2).is_err());
}

#[test]
fn test_convert_into_matches_allocating() {
    let bgra = gradient_bgra(16, 8);
    let mut out = vec![0u8; PixelLayout::Nv12.buffer_size(16, 8)];
    convert_to_nv12_into(&bgra, &mut out, 16, 8).unwrap();
    assert_eq!(out, convert_to_nv12(&bgra, 16, 8).unwrap());
}

#[test]
fn test_flip_twice_is_identity() {
    let frame = gradient_bgra(6, 4);
    for (h, v) in [(true, false), (false, true), (true, true)] {
        let once = apply_flip(&frame, 6, 4, h, v).unwrap();
        let twice = apply_flip(&once, 6, 4, h, v).unwrap();
        assert_eq!(twice, frame, "flip_h={} flip_v={}", h, v);
    }
}

#[test]
fn test_horizontal_flip_swaps_corners() {
    let frame = gradient_bgra(6, 4);
    let flipped = apply_flip(&frame, 6, 4, true, false).unwrap();
    assert_eq!(pixel(&flipped, 6, 0, 0), pixel(&frame, 6, 5, 0));
    assert_eq!(pixel(&flipped, 6, 5, 0), pixel(&frame, 6, 0, 0));
    assert_eq!(pixel(&flipped, 6, 2, 3), pixel(&frame, 6, 3, 3));
}

#[test]
fn test_vertical_flip_swaps_rows() {
    let frame = gradient_bgra(6, 4);
    let flipped = apply_flip(&frame, 6, 4, false, true).unwrap();
    assert_eq!(pixel(&flipped, 6, 1, 0), pixel(&frame, 6, 1, 3));
    assert_eq!(pixel(&flipped, 6, 4, 2), pixel(&frame, 6, 4, 1));
}

#[test]
fn test_flip_rejects_empty_frames() {
    for (width, height) in [(0, 4), (4, 0), (0, 0)] {
        assert!(matches!(
            apply_flip(&[], width, height, true, false),
            Err(RtspCamError::InvalidGeometry(_))
        ));
    }

    // Odd sizes are fine for flipping
    let frame = gradient_bgra(3, 1);
    let flipped = apply_flip(&frame, 3, 1, true, false).unwrap();
    assert_eq!(pixel(&flipped, 3, 0, 0), pixel(&frame, 3, 2, 0));
    assert_eq!(pixel(&flipped, 3, 1, 0), pixel(&frame, 3, 1, 0));
}

#[test]
fn test_no_flip_is_copy() {
    let frame = gradient_bgra(4, 2);
    assert_eq!(apply_flip(&frame, 4, 2, false, false).unwrap(), frame);
}

#[test]
fn test_neutral_levels_leave_frame_unchanged() {
    let original = gradient_bgra(8, 8);
    let mut frame = original.clone();
    apply_brightness_contrast(&mut frame, 0, 0);
    assert_eq!(frame, original);
}

#[test]
fn test_brightness_extremes_saturate() {
    let mut bright = gradient_bgra(4, 4);
    apply_brightness_contrast(&mut bright, 100, 0);
    assert!(bright.chunks_exact(4).all(|px| px[..3] == [255, 255, 255]));

    let mut dark = gradient_bgra(4, 4);
    apply_brightness_contrast(&mut dark, -100, 0);
    assert!(dark.chunks_exact(4).all(|px| px[..3] == [0, 0, 0]));
}

#[test]
fn test_minimum_contrast_flattens_to_mid_gray() {
    let mut frame = gradient_bgra(4, 4);
    apply_brightness_contrast(&mut frame, 0, -100);
    assert!(frame.chunks_exact(4).all(|px| px[..3] == [128, 128, 128]));
}

#[test]
fn test_levels_formula_and_alpha() {
    let mut frame = solid_bgra(2, 2, [100, 128, 200, 77]);
    apply_brightness_contrast(&mut frame, 50, 0);
    // 100 + 127.5, 128 + 127.5, 200 + 127.5 clamped
    assert_eq!(pixel(&frame, 2, 0, 0), [227, 255, 255, 77]);

    let mut frame = solid_bgra(2, 2, [100, 128, 200, 77]);
    apply_brightness_contrast(&mut frame, 0, 100);
    // (v - 128) * 2 + 128
    assert_eq!(pixel(&frame, 2, 1, 1), [72, 128, 255, 77]);
}

#[test]
fn test_combined_extremes_clamp() {
    // (v - 128) * 2 + 128 + 255 never falls below 255
    let mut frame = gradient_bgra(4, 4);
    apply_brightness_contrast(&mut frame, 100, 100);
    assert!(frame.chunks_exact(4).all(|px| px[..3] == [255, 255, 255]));
    assert!(frame.chunks_exact(4).all(|px| px[3] == 255));

    // (v - 128) * 2 + 128 - 255
    let mut frame = solid_bgra(2, 2, [100, 128, 200, 77]);
    apply_brightness_contrast(&mut frame, -100, 100);
    assert_eq!(pixel(&frame, 2, 0, 1), [0, 0, 17, 77]);
}

#[test]
fn test_out_of_range_adjustments_are_clamped() {
    let mut a = gradient_bgra(4, 4);
    let mut b = a.clone();
    apply_brightness_contrast(&mut a, 250, -400);
    apply_brightness_contrast(&mut b, 100, -100);
    assert_eq!(a, b);

    let adjustments = ImageAdjustments::NONE.with_brightness(300).with_contrast(-300);
    assert_eq!(adjustments.clamped().brightness, 100);
    assert_eq!(adjustments.clamped().contrast, -100);
}
