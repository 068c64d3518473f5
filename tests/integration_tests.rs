use geo::{Distance, Haversine, Point};
use rgis::datum::corrected_distance;
use rgis::{
    Airport, Config, CsvParser, GeoPos, GisError, GisItem, GisItemDB, GisItemDBFactory, Place,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const LONG_RANGE: f64 = 100_000.0;

/// Deterministic pseudo-random sequence so failures are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

fn random_places(n: usize, seed: u64) -> Vec<Place> {
    let mut rng = Lcg(seed);
    let mut places: Vec<Place> = Vec::with_capacity(n);
    for i in 0..n {
        // every tenth item shares the position of its predecessor
        if i % 10 == 9 {
            let pos = places[i - 1].base.pos;
            places.push(Place::new(format!("P{}", i), pos.lat, pos.lon, pos.alt, "dup", ""));
        } else {
            let lat = rng.range(-70.0, 70.0);
            let lon = rng.range(-180.0, 180.0);
            let alt = rng.range(0.0, 3_000.0);
            places.push(Place::new(format!("P{}", i), lat, lon, alt, "random", ""));
        }
    }
    places
}

fn build(places: &[Place]) -> GisItemDB<Place> {
    let mut factory = GisItemDBFactory::new().with_build_date(0);
    for p in places {
        factory.add_item(p.clone()).unwrap();
    }
    GisItemDB::from_bytes(factory.to_bytes().unwrap()).unwrap()
}

/// Every item with its distance to `target`, nearest first, ties in file order.
fn brute_force(places: &[Place], target: &GeoPos) -> Vec<(String, f64)> {
    let t = target.to_ecef();
    let mut all: Vec<(String, f64)> = places
        .iter()
        .map(|p| {
            let d = corrected_distance(p.ecef().distance(&t), LONG_RANGE);
            (p.base.name.clone(), d)
        })
        .collect();
    all.sort_by(|a, b| a.1.total_cmp(&b.1));
    all
}

fn names(hits: &[(Place, f64)]) -> Vec<String> {
    hits.iter().map(|(p, _)| p.base.name.clone()).collect()
}

fn three_places() -> GisItemDBFactory<Place> {
    let mut factory = GisItemDBFactory::new();
    factory
        .add_item(Place::new("A", 0.0, 0.0, 0.0, "marker", ""))
        .unwrap();
    factory
        .add_item(Place::new("B", 0.0, 1.0, 0.0, "marker", ""))
        .unwrap();
    factory
        .add_item(Place::new("C", 1.0, 0.0, 0.0, "marker", ""))
        .unwrap();
    factory
}

#[test]
fn test_write_and_open_file() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("places.rgis");

    let factory = three_places();
    factory.write(&path).unwrap();

    let db = GisItemDB::<Place>::open(&path).unwrap();
    assert_eq!(db.len(), 3);
    for original in factory.items() {
        let stored = db.get_item(&original.base.name).unwrap().unwrap();
        assert_eq!(&stored, original);
    }
    assert!(db.get_item("D").unwrap().is_none());
}

#[test]
fn test_three_point_queries() {
    let db = GisItemDB::<Place>::from_bytes(three_places().to_bytes().unwrap()).unwrap();
    let origin = GeoPos::new(0.0, 0.0, 0.0);

    let (nearest, d) = db.get_nearest_item(&origin).unwrap().unwrap();
    assert_eq!(nearest.base.name, "A");
    assert!(d.abs() < 1e-6);

    let within = db.get_items_within(&origin, 120_000.0).unwrap();
    assert_eq!(names(&within), vec!["A", "C", "B"]);

    let haversine_b = Haversine.distance(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
    let haversine_c = Haversine.distance(Point::new(0.0, 0.0), Point::new(0.0, 1.0));
    let d_c = within[1].1;
    let d_b = within[2].1;
    assert!((d_b - haversine_b).abs() / haversine_b < 0.01, "{} vs {}", d_b, haversine_b);
    assert!((d_c - haversine_c).abs() / haversine_c < 0.01, "{} vs {}", d_c, haversine_c);

    assert_eq!(db.get_items_within(&origin, 100.0).unwrap().len(), 1);

    let two = db.get_n_nearest_items(&origin, 2).unwrap();
    assert_eq!(names(&two), vec!["A", "C"]);
    let all = db.get_n_nearest_items(&origin, 10).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn test_queries_match_brute_force() {
    let places = random_places(600, 7);
    let db = build(&places);
    let mut rng = Lcg(99);

    for _ in 0..40 {
        let target = GeoPos::new(rng.range(-80.0, 80.0), rng.range(-180.0, 180.0), 0.0);
        let expected = brute_force(&places, &target);

        let (nearest, d) = db.get_nearest_item(&target).unwrap().unwrap();
        assert_eq!(nearest.base.name, expected[0].0);
        assert!((d - expected[0].1).abs() < 1e-6);

        let knn = db.get_n_nearest_items(&target, 12).unwrap();
        let want: Vec<String> = expected.iter().take(12).map(|(n, _)| n.clone()).collect();
        assert_eq!(names(&knn), want);
        assert!(knn.windows(2).all(|w| w[0].1 <= w[1].1));

        let radius = rng.range(100_000.0, 1_500_000.0);
        let within = db.get_items_within(&target, radius).unwrap();
        let want: Vec<String> = expected
            .iter()
            .filter(|(_, d)| *d <= radius)
            .map(|(n, _)| n.clone())
            .collect();
        assert_eq!(names(&within), want);
    }
}

#[test]
fn test_duplicate_positions_resolve_in_file_order() {
    let mut factory = GisItemDBFactory::new();
    for name in ["first", "second", "third"] {
        factory
            .add_item(Place::new(name, 48.85, 2.35, 35.0, "stack", ""))
            .unwrap();
    }
    factory
        .add_item(Place::new("elsewhere", 51.5, -0.12, 0.0, "other", ""))
        .unwrap();
    let db = GisItemDB::<Place>::from_bytes(factory.to_bytes().unwrap()).unwrap();
    let paris = GeoPos::new(48.85, 2.35, 35.0);

    let (nearest, _) = db.get_nearest_item(&paris).unwrap().unwrap();
    assert_eq!(nearest.base.name, "first");

    let knn = db.get_n_nearest_items(&paris, 3).unwrap();
    assert_eq!(names(&knn), vec!["first", "second", "third"]);

    let within = db.get_items_within(&paris, 1.0).unwrap();
    assert_eq!(names(&within), vec!["first", "second", "third"]);
}

#[test]
fn test_every_name_is_found() {
    let places = random_places(1_000, 3);
    let db = build(&places);
    for p in &places {
        let found = db.get_item(&p.base.name).unwrap().unwrap();
        assert_eq!(&found, p);
    }
    for i in 1_000..1_100 {
        assert!(db.get_item(&format!("P{}", i)).unwrap().is_none());
    }
}

#[test]
fn test_sections_independent_of_build_date() {
    let places = random_places(200, 11);
    let bytes = |date: i64| {
        let mut factory = GisItemDBFactory::new().with_build_date(date);
        for p in &places {
            factory.add_item(p.clone()).unwrap();
        }
        factory.to_bytes().unwrap()
    };

    let a = bytes(1);
    let b = bytes(1_700_000_000_000);
    assert_ne!(a, b);
    // length and checksum match, only the date differs
    assert_eq!(a[..12], b[..12]);
    assert_eq!(a[20..], b[20..]);

    let db = GisItemDB::<Place>::from_bytes(b).unwrap();
    assert_eq!(db.build_date(), 1_700_000_000_000);
}

#[test]
fn test_concurrent_queries() {
    let places = random_places(300, 5);
    let db = Arc::new(build(&places));
    let places = Arc::new(places);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            let places = Arc::clone(&places);
            thread::spawn(move || {
                for p in places.iter().skip(t).step_by(4) {
                    let found = db.get_item(&p.base.name).unwrap().unwrap();
                    assert_eq!(found.base.name, p.base.name);

                    let (nearest, d) = db.get_nearest_item(&p.base.pos).unwrap().unwrap();
                    assert!(d < 1e-3);
                    assert_eq!(nearest.base.pos, p.base.pos);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_airport_database_from_csv() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("airports.csv");
    let output = dir.path().join("airports.rgis");
    std::fs::write(
        &input,
        "id,lat,lon,elevation_ft,city,country,runways,towered\n\
         KSFO,37.6189,-122.3750,13,San Francisco,US,4,true\n\
         KOAK,37.7213,-122.2208,9,Oakland,US,4,true\n\
         KHAF,37.5134,-122.5012,66,Half Moon Bay,US,1,false\n\
         EGLL,51.4700,-0.4543,83,London,GB,2,true\n",
    )
    .unwrap();

    let mut factory = GisItemDBFactory::<Airport>::new();
    let n = factory
        .create_db(&CsvParser::new(), &input, &output)
        .unwrap();
    assert_eq!(n, 4);

    let db = GisItemDB::<Airport>::open(&output).unwrap();
    assert_eq!(db.schema(), "airport");

    let sfo = db.get_item("KSFO").unwrap().unwrap();
    assert_eq!(sfo.city, "San Francisco");
    assert_eq!(sfo.runways, 4);
    assert!(sfo.towered);

    let downtown = GeoPos::new(37.7749, -122.4194, 0.0);
    let bay = db.get_items_within(&downtown, 60_000.0).unwrap();
    assert_eq!(bay.len(), 3);
    assert!(bay.iter().all(|(a, _)| a.country == "US"));

    let (farthest, d) = db.get_n_nearest_items(&downtown, 4).unwrap().pop().unwrap();
    assert_eq!(farthest.base.name, "EGLL");
    let expected = Haversine.distance(Point::new(-122.4194, 37.7749), Point::new(-0.4543, 51.47));
    assert!((d - expected).abs() / expected < 0.01);

    assert!(matches!(
        GisItemDB::<Place>::open(&output),
        Err(GisError::SchemaMismatch { .. })
    ));
}

#[test]
fn test_config_long_range_threshold() {
    let bytes = three_places().to_bytes().unwrap();
    let origin = GeoPos::new(0.0, 0.0, 0.0);

    let chord_only = Config::default().with_long_range_threshold(f64::MAX);
    let db = GisItemDB::<Place>::from_bytes_with_config(bytes.clone(), chord_only).unwrap();
    let chord = db.get_items_within(&origin, 200_000.0).unwrap();

    let db = GisItemDB::<Place>::from_bytes(bytes).unwrap();
    let arc = db.get_items_within(&origin, 200_000.0).unwrap();

    assert_eq!(names(&chord), names(&arc));
    for ((_, c), (_, a)) in chord.iter().zip(&arc).skip(1) {
        assert!(a > c);
    }
}
