use niftyreg_bridge::pyramid::*;
use niftyreg_bridge::ImageGeometry;

#[test]
fn test_halving_rounds_half_up() {
    let map = compute_levels(&[125, 99, 67]);
    assert_eq!(map.get(0), Some(&[125, 99, 67][..]));
    assert_eq!(map.get(1), Some(&[63, 50, 34][..]));
    // next would be 32 x 25 x 17, below the floor
    assert_eq!(map.max_level(), 1);
}

#[test]
fn test_every_stored_level_respects_floor() {
    let map = compute_levels(&[512, 400, 300]);
    for (level, shape) in map.iter().skip(1) {
        assert!(shape.iter().all(|&n| n >= MIN_LEVEL_SIZE), "level {} too small", level);
    }
    assert_eq!(map.get(3), Some(&[64, 50, 38][..]));
    assert_eq!(map.get(4), None);
}

#[test]
fn test_level_zero_kept_even_when_small() {
    let map = compute_levels(&[20, 20, 20]);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(0), Some(&[20, 20, 20][..]));
    assert_eq!(map.max_level(), 0);
}

#[test]
fn test_2d_image_has_single_level() {
    let geometry = ImageGeometry::new([940, 540, 1]);
    let map = pyramid_for(Some(&geometry), MIN_LEVEL_SIZE).unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(shape_label(map.get(0).unwrap()), "940 x 540 x 1");
    assert!(pyramid_for(None, MIN_LEVEL_SIZE).is_none());
}

#[test]
fn test_custom_floor() {
    let map = compute_levels_with_floor(&[64, 64, 64], 8);
    assert_eq!(map.max_level(), 3);
    assert_eq!(map.get(3), Some(&[8, 8, 8][..]));
}

#[test]
fn test_level_flags() {
    let range = LevelRange::new(2, 3);
    assert_eq!(range.levels_to_build(), 4);
    assert_eq!(range.levels_to_perform(), 2);

    let swapped = LevelRange::new(4, 1);
    assert_eq!(swapped, LevelRange { lowest: 1, highest: 4 });
    assert_eq!(LevelRange::new(0, 0).levels_to_perform(), 1);
}

#[test]
fn test_selector_keeps_bounds_ordered() {
    let mut selector = LevelSelector::new(3, 2, 5);
    selector.set_lowest(4);
    assert_eq!(selector.range(), LevelRange { lowest: 4, highest: 4 });

    selector.set_highest(1);
    assert_eq!(selector.range(), LevelRange { lowest: 1, highest: 1 });

    selector.set_highest(9);
    assert_eq!(selector.range().highest, 5);

    selector.set_max_level(2);
    assert_eq!(selector.range(), LevelRange { lowest: 1, highest: 2 });
}

#[test]
fn test_compare_levels_with_missing_floating_level() {
    let reference = compute_levels(&[256, 256, 256]);
    let floating = compute_levels(&[64, 64, 64]);
    let [high, low] = compare_levels(&reference, Some(&floating), LevelRange::new(1, 2));

    assert_eq!(high.level, 2);
    assert_eq!(high.reference, Some(vec![64, 64, 64]));
    assert_eq!(high.floating, None);
    assert_eq!(low.level, 1);
    assert_eq!(low.floating, Some(vec![32, 32, 32]));
}
