use crate::testing::{FakeImages, RecordingExecutor, ScriptedClock};
use crate::{
    AllocError, AtlasAllocator, AtlasConfig, CellPoint, CellRect, CellSize, CellTag, PageId,
    SourceId, SurfaceDescriptor, TileId, TileSource,
};

type Allocator = AtlasAllocator<u64, SurfaceDescriptor>;

fn tile(source: u64, width: u32, height: u32) -> TileSource<u64> {
    TileSource::ready(SourceId::new(source), source, width, height)
}

fn default_allocator() -> Allocator {
    Allocator::new(AtlasConfig::default()).unwrap()
}

fn assert_no_overlap(allocator: &Allocator) {
    let entries: Vec<_> = allocator.entries().collect();
    for (index, left) in entries.iter().enumerate() {
        for right in &entries[index + 1..] {
            let shared_page = left.slot_pages().any(|page| right.slot_pages().any(|other| other == page));
            assert!(
                !(shared_page && left.cells.intersects(right.cells)),
                "tiles {:?} and {:?} overlap",
                left.id,
                right.id
            );
        }
    }
}

#[test]
fn example_scenario_places_and_reuses_first_fit() {
    let mut allocator = default_allocator();

    let a = allocator.allocate(&[tile(2, 300, 300)], 1.0, None).unwrap();
    let entry = allocator.entry(a).unwrap();
    assert_eq!(
        entry.cells,
        CellRect::new(CellPoint { x: 0, y: 0 }, CellSize {
            width: 19,
            height: 19
        })
    );

    let b = allocator.allocate(&[tile(3, 64, 64)], 1.0, None).unwrap();
    assert_eq!(
        allocator.entry(b).unwrap().cells,
        CellRect::new(CellPoint { x: 19, y: 0 }, CellSize {
            width: 5,
            height: 5
        })
    );

    allocator.free(a, None).unwrap();
    let c = allocator.allocate(&[tile(4, 300, 300)], 1.0, None).unwrap();
    assert_eq!(
        allocator.entry(c).unwrap().cells.origin(),
        CellPoint { x: 0, y: 0 }
    );
    assert_no_overlap(&allocator);
}

#[test]
fn many_allocations_never_overlap() {
    let mut allocator = Allocator::new(AtlasConfig {
        page_width: 512,
        page_height: 512,
        max_pages: 3,
        ..AtlasConfig::default()
    })
    .unwrap();
    let mut live = Vec::new();
    for source in 2..120u64 {
        let size = 8 + (source * 37 % 120) as u32;
        match allocator.allocate(&[tile(source, size, size / 2 + 4)], 1.0, None) {
            Ok(id) => live.push(id),
            Err(AllocError::NoRoom) => break,
            Err(error) => panic!("unexpected allocation failure: {error}"),
        }
        if source % 5 == 0 {
            let victim = live.remove(live.len() / 2);
            allocator.free(victim, None).unwrap();
        }
    }
    assert_no_overlap(&allocator);
    for entry in allocator.entries() {
        let grid = allocator.page(entry.page).unwrap().occupancy();
        assert_eq!(
            grid.count_owned_by(entry.id),
            (entry.cells.width * entry.cells.height) as usize
        );
    }
}

#[test]
fn uv_is_a_pure_function_of_cells() {
    let mut allocator = default_allocator();
    allocator.allocate(&[tile(2, 300, 300)], 1.0, None).unwrap();
    let b = allocator.allocate(&[tile(3, 64, 64)], 1.0, None).unwrap();

    let (page, uv) = allocator.get(b, None).unwrap();
    assert_eq!(page, PageId::new(0));
    assert_eq!(uv, allocator.layout().uv(allocator.entry(b).unwrap().cells));
    assert_eq!(allocator.get(b, None), Some((page, uv)));
    assert_eq!(uv.u0, 306.0 / 2048.0);
    assert_eq!(uv.du, 76.0 / 2048.0);
}

#[test]
fn dedup_returns_same_id_without_touching_occupancy() {
    let mut allocator = default_allocator();
    let group = [tile(2, 40, 40), tile(3, 40, 40)];
    let first = allocator.allocate(&group, 1.0, None).unwrap();
    let used: Vec<_> = allocator
        .pages()
        .iter()
        .map(|page| page.occupancy().used_count())
        .collect();
    let queued = allocator.pending_ops();

    let second = allocator.allocate(&group, 1.0, None).unwrap();

    assert_eq!(first, second);
    let used_after: Vec<_> = allocator
        .pages()
        .iter()
        .map(|page| page.occupancy().used_count())
        .collect();
    assert_eq!(used, used_after);
    assert_eq!(allocator.pending_ops(), queued);
}

#[test]
fn token_resolution_keeps_cell_rect() {
    let mut allocator = default_allocator();
    let token = allocator
        .reserve_token("atlas://grass", 96, 96, 2, 1.0, None)
        .unwrap();
    let reserved = allocator.entry(token).unwrap().clone();
    assert!(reserved.is_token);
    assert_eq!(allocator.get("atlas://grass", None), Some((reserved.page, reserved.uv)));
    for page in reserved.slot_pages() {
        let grid = allocator.page(page).unwrap().occupancy();
        assert_eq!(grid.tag(reserved.cells.origin()), Some(CellTag::Reserved(token)));
    }

    let resolved = allocator
        .resolve_token(
            &[
                tile(2, 96, 96).with_url("atlas://grass"),
                tile(3, 96, 96),
            ],
            1.0,
        )
        .unwrap();

    assert_eq!(resolved, token);
    let entry = allocator.entry(token).unwrap();
    assert!(!entry.is_token);
    assert_eq!(entry.cells, reserved.cells);
    assert_eq!(entry.uv, reserved.uv);
    for page in entry.slot_pages() {
        let grid = allocator.page(page).unwrap().occupancy();
        assert_eq!(grid.tag(entry.cells.origin()), Some(CellTag::Owned(token)));
    }
    assert_eq!(allocator.pending_ops(), 2);
}

#[test]
fn token_shape_mismatch_leaves_reservation() {
    let mut allocator = default_allocator();
    let token = allocator
        .reserve_token("atlas://rock", 96, 96, 2, 1.0, None)
        .unwrap();
    let before = allocator.entry(token).unwrap().clone();

    let wrong_count = allocator.resolve_token(&[tile(2, 96, 96).with_url("atlas://rock")], 1.0);
    assert_eq!(wrong_count, Err(AllocError::ShapeMismatch));
    let wrong_size = allocator.resolve_token(
        &[tile(2, 200, 96).with_url("atlas://rock"), tile(3, 200, 96)],
        1.0,
    );
    assert_eq!(wrong_size, Err(AllocError::ShapeMismatch));

    assert_eq!(allocator.entry(token), Some(&before));
    let grid = allocator.page(before.page).unwrap().occupancy();
    assert_eq!(grid.tag(before.cells.origin()), Some(CellTag::Reserved(token)));
    assert_eq!(allocator.pending_ops(), 0);
}

#[test]
fn free_restores_capacity() {
    let mut allocator = Allocator::new(AtlasConfig {
        page_width: 256,
        page_height: 256,
        auto_grow: false,
        ..AtlasConfig::default()
    })
    .unwrap();
    let big = [tile(2, 200, 200)];
    let id = allocator.allocate(&big, 1.0, None).unwrap();
    let other = [tile(3, 200, 200)];
    assert!(!allocator.is_space_enough(&other, 1.0, PageId::new(0)));

    allocator.free(id, None).unwrap();

    assert!(allocator.is_space_enough(&other, 1.0, PageId::new(0)));
    assert_eq!(allocator.find_page_with_room(&other, 1.0), Some(PageId::new(0)));
    assert_eq!(
        allocator.page(PageId::new(0)).unwrap().occupancy().count_owned_by(id),
        0
    );
}

#[test]
fn growth_preserves_existing_entries() {
    let mut allocator = Allocator::new(AtlasConfig {
        page_width: 256,
        page_height: 256,
        max_pages: 4,
        ..AtlasConfig::default()
    })
    .unwrap();
    let mut before = Vec::new();
    for source in 2..6u64 {
        let id = allocator.allocate(&[tile(source, 100, 100)], 1.0, None).unwrap();
        before.push(allocator.entry(id).unwrap().clone());
    }
    assert_eq!(allocator.page_count(), 1);

    allocator.allocate(&[tile(9, 100, 100)], 1.0, None).unwrap();

    assert_eq!(allocator.page_count(), 2);
    for entry in &before {
        assert_eq!(allocator.entry(entry.id), Some(entry));
    }
}

#[test]
fn growth_stops_at_max_pages() {
    let mut allocator = Allocator::new(AtlasConfig {
        page_width: 64,
        page_height: 64,
        max_pages: 2,
        ..AtlasConfig::default()
    })
    .unwrap();
    allocator.allocate(&[tile(2, 60, 60)], 1.0, None).unwrap();
    allocator.allocate(&[tile(3, 60, 60)], 1.0, None).unwrap();
    assert_eq!(
        allocator.allocate(&[tile(4, 60, 60)], 1.0, None),
        Err(AllocError::NoRoom)
    );
    assert_eq!(allocator.page_count(), 2);
}

#[test]
fn budget_bound_applies_one_blit_per_advance() {
    let mut allocator = Allocator::new(AtlasConfig {
        margin: 0,
        ..AtlasConfig::default()
    })
    .unwrap();
    let mut images = FakeImages::default();
    let mut executor = RecordingExecutor::default();
    for source in 2..5u64 {
        images.insert_ready(source, 32, 32);
        allocator.allocate(&[tile(source, 32, 32)], 1.0, None).unwrap();
    }

    for applied in 1..=3 {
        let clock = ScriptedClock::new([0.0, 1.0]);
        allocator.advance(&mut images, &mut executor, &clock, 0.0, false);
        assert_eq!(executor.blits.len(), applied);
    }
    assert_eq!(allocator.pending_ops(), 0);
}

#[test]
fn force_advance_ignores_clock() {
    let mut allocator = default_allocator();
    let mut images = FakeImages::default();
    let mut executor = RecordingExecutor::default();
    for source in 2..12u64 {
        images.insert_ready(source, 20, 20);
        allocator.allocate(&[tile(source, 20, 20)], 1.0, None).unwrap();
    }
    let clock = ScriptedClock::new([0.0, 1_000.0]);

    let stats = allocator.advance(&mut images, &mut executor, &clock, 0.0, true);

    assert_eq!(stats.blits_applied, 10);
    assert_eq!(clock.reads(), 0);
}

#[test]
fn dropped_blits_are_not_retried() {
    let mut allocator = default_allocator();
    let mut images = FakeImages::default();
    let mut executor = RecordingExecutor {
        fail_blits: true,
        ..RecordingExecutor::default()
    };
    images.insert_ready(2, 20, 20);
    allocator.allocate(&[tile(2, 20, 20)], 1.0, None).unwrap();

    let stats = allocator.advance(&mut images, &mut executor, &ScriptedClock::new([0.0]), 0.0, true);

    assert_eq!(stats.ops_dropped, 1);
    assert_eq!(allocator.pending_ops(), 0);
}

#[test]
fn issued_tile_ids_are_never_reused() {
    let mut allocator = default_allocator();
    let first = allocator.allocate(&[tile(2, 20, 20)], 1.0, None).unwrap();
    allocator.free(first, None).unwrap();
    let second = allocator.allocate(&[tile(2, 20, 20)], 1.0, None).unwrap();
    assert!(first.raw() >= 2);
    assert_ne!(first, second);
    assert_ne!(second, TileId::SWATCH);
}
