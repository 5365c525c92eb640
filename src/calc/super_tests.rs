//! This is a module for integration tests of the engine, but with
//! access to private fields and methods.
//!
//! Most engine methods operate on data acquired through a loader, so
//! each test drives a full calculation against a deterministic
//! in-memory loader instead of stubbing the internals piecemeal.

use super::*;
use crate::constants::GRAV_EARTH;
use crate::errors::{CalcError, ConfigError, InputError};
use crate::Float;
use chrono::{NaiveDate, NaiveDateTime};
use float_cmp::approx_eq;
use ndarray::{arr1, Array1, Array2, Array3, Array4};
use std::path::Path;
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stamp(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    (next - first).num_days()
}

const NLAT: usize = 4;
const NLON: usize = 4;

/// Deterministic in-memory data source.
///
/// Surface pressure is uniform, the variable named "ones" is constant
/// one, and everything else varies by year, month and grid position.
struct TestLoader {
    daily: bool,
}

impl TestLoader {
    fn monthly() -> TestLoader {
        TestLoader { daily: false }
    }

    fn daily() -> TestLoader {
        TestLoader { daily: true }
    }

    fn value(var: &Var, year: i32, month: u32, day: u32, k: usize, j: usize, i: usize) -> Float {
        match var.name.as_str() {
            "ps" => 1.0e5,
            "ones" => 1.0,
            _ => {
                (year - 2004) as Float
                    + month as Float * 0.1
                    + day as Float * 0.002
                    + k as Float * 0.5
                    + j as Float * 0.01
                    + i as Float * 0.001
            }
        }
    }
}

impl DataLoader for TestLoader {
    fn load_variable(
        &self,
        var: &Var,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
        _time_offset: Option<TimeOffset>,
        _selectors: &LoaderSelectors,
    ) -> Result<GriddedSeries, InputError> {
        use chrono::Datelike;

        let nlev = if var.def_vert { 2 } else { 1 };
        let mut time = Vec::new();
        let mut dt = Vec::new();

        for year in start_date.year()..=end_date.year() {
            for month in 1..=12 {
                if self.daily {
                    for day in 1..=days_in_month(year, month) as u32 {
                        time.push(stamp(year, month, day));
                        dt.push(86_400.0);
                    }
                } else {
                    time.push(stamp(year, month, 15));
                    dt.push(days_in_month(year, month) as Float * 86_400.0);
                }
            }
        }

        let values = Array4::from_shape_fn((time.len(), nlev, NLAT, NLON), |(t, k, j, i)| {
            TestLoader::value(var, time[t].year(), time[t].month(), time[t].day(), k, j, i)
        });

        Ok(GriddedSeries {
            dt_seconds: Array1::from_vec(dt),
            time,
            level: None,
            lat: None,
            lon: None,
            values,
        })
    }
}

fn test_grid() -> ModelGrid {
    ModelGrid {
        lat: arr1(&[-45.0, -15.0, 15.0, 45.0]),
        lon: arr1(&[45.0, 135.0, 225.0, 315.0]),
        sfc_area: Array2::from_elem((NLAT, NLON), 1.0e12),
        land_mask: None,
        level: Some(arr1(&[9.0e4, 5.0e4])),
        bk: Some(arr1(&[0.0, 0.4, 1.0])),
        pk: Some(arr1(&[0.0, 0.0, 0.0])),
        pfull: Some(arr1(&[2.0e4, 7.0e4])),
    }
}

fn test_proj(base: &Path) -> Arc<Proj> {
    Arc::new(Proj {
        name: "testproj".to_string(),
        direc_out: base.join("out"),
        tar_direc_out: Some(base.join("tar")),
    })
}

fn test_model() -> Arc<Model> {
    Arc::new(Model {
        name: "am2".to_string(),
        runs: vec!["control".to_string()],
        grid: test_grid(),
    })
}

fn test_run() -> Arc<Run> {
    Arc::new(Run {
        name: "control".to_string(),
        default_start_date: stamp(2004, 1, 1),
        default_end_date: stamp(2006, 12, 31),
    })
}

fn rain_var() -> Arc<Var> {
    Arc::new(Var::loaded("precip", "m", "rain", "atmos", true, false))
}

fn globe() -> Region {
    Region {
        name: "globe".to_string(),
        description: None,
        mask_bounds: vec![RegionBounds {
            lat: (-90.0, 90.0),
            lon: (0.0, 360.0),
        }],
        land_mask: LandMaskKind::None,
    }
}

fn tropics() -> Region {
    Region {
        name: "tropics".to_string(),
        description: None,
        mask_bounds: vec![RegionBounds {
            lat: (-30.0, 30.0),
            lon: (0.0, 360.0),
        }],
        land_mask: LandMaskKind::None,
    }
}

fn base_params(base: &Path, tags: &[&str]) -> CalcParams {
    CalcParams {
        proj: test_proj(base),
        model: test_model(),
        run: test_run(),
        var: rain_var(),
        date_range: (stamp(2004, 1, 1), stamp(2006, 12, 31)),
        intvl_in: InputInterval::Monthly,
        intvl_out: Interval::Annual,
        dtype_in_time: InputTimeKind::TimeSeries,
        dtype_in_vert: VerticalCoord::None,
        dtype_out_time: tags.iter().map(|t| t.to_string()).collect(),
        dtype_out_vert: VertReduction::None,
        regions: Vec::new(),
        time_offset: None,
        ens_mem: None,
    }
}

fn stat(entry: &OutputEntry) -> &Array3<Float> {
    match &entry.payload {
        OutputPayload::Gridded(GriddedValues::Stat(data)) => data,
        other => panic!("expected a gridded stat payload, got {:?}", other),
    }
}

#[test]
fn annual_mean_computes_and_persists() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut calc = Calc::new(base_params(dir.path(), &["av"])).unwrap();

    calc.compute(&TestLoader::monthly(), true).unwrap();

    let path = calc.path_out("av").unwrap();
    assert!(path.is_file());
    assert!(calc.path_tar_out().unwrap().is_file());

    let entry = calc.load("av", &LoadOptions::default()).unwrap();
    assert_eq!(entry.units, "m");
    assert_eq!(entry.description, "rain");

    // Mean over the three yearly values at the first gridpoint, each
    // a duration-weighted mean of its months (2004 is a leap year, so
    // the per-year weights differ).
    let expected: Float = (2004..=2006)
        .map(|year| {
            let mut num = 0.0;
            let mut den = 0.0;
            for month in 1..=12u32 {
                let w = days_in_month(year, month) as Float;
                num += w * (month as Float * 0.1 + 15.0 * 0.002);
                den += w;
            }
            (year - 2004) as Float + num / den
        })
        .sum::<Float>()
        / 3.0;
    let data = stat(&entry);
    assert!(approx_eq!(Float, data[[0, 0, 0]], expected, epsilon = 1.0e-9));
}

#[test]
fn output_keys_match_requested_tags_sorted() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    // Deliberately unsorted request order.
    let mut calc = Calc::new(base_params(dir.path(), &["ts", "std", "av"])).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    assert_eq!(calc.output_tags(), vec!["av", "std", "ts"]);
    for tag in ["ts", "std", "av"] {
        assert!(calc.cached(tag).is_some());
        assert!(calc.path_out(tag).unwrap().is_file());
    }
}

#[test]
fn monthly_input_makes_time_mean_equal_full() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut calc = Calc::new(base_params(dir.path(), &["av", "time-mean.av"])).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    let full = calc.load("av", &LoadOptions::default()).unwrap();
    let monthly = calc.load("time-mean.av", &LoadOptions::default()).unwrap();

    for (a, b) in stat(&full).iter().zip(stat(&monthly).iter()) {
        assert!(approx_eq!(Float, *a, *b, epsilon = 1.0e-12));
    }
}

#[test]
fn whole_grid_regional_average_equals_global_mean() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av", "reg.av"]);
    params.regions = vec![globe()];
    let mut calc = Calc::new(params).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    let gridded = calc.load("av", &LoadOptions::default()).unwrap();
    let regional = calc.load("reg.av", &LoadOptions::default()).unwrap();

    let global_mean = stat(&gridded).mean().unwrap();
    match &regional.payload {
        OutputPayload::Regional(regions) => match &regions["globe"].values {
            RegionValues::Stat(values) => {
                assert!(approx_eq!(Float, values[0], global_mean, epsilon = 1.0e-9));
            }
            other => panic!("expected stat values, got {:?}", other),
        },
        other => panic!("expected regional payload, got {:?}", other),
    }
}

#[test]
fn recomputing_is_idempotent_on_disk() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut first = Calc::new(base_params(dir.path(), &["av", "ts"])).unwrap();
    first.compute(&TestLoader::monthly(), false).unwrap();
    let av_bytes = std::fs::read(first.path_out("av").unwrap()).unwrap();
    let ts_bytes = std::fs::read(first.path_out("ts").unwrap()).unwrap();

    let mut second = Calc::new(base_params(dir.path(), &["av", "ts"])).unwrap();
    second.compute(&TestLoader::monthly(), false).unwrap();

    assert_eq!(av_bytes, std::fs::read(second.path_out("av").unwrap()).unwrap());
    assert_eq!(ts_bytes, std::fs::read(second.path_out("ts").unwrap()).unwrap());
}

#[test]
fn vertical_integral_of_ones_recovers_surface_pressure() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);
    params.var = Arc::new(Var::loaded("ones", "m", "rain", "atmos", true, true));
    params.dtype_in_vert = VerticalCoord::Sigma;
    params.dtype_out_vert = VertReduction::VertInt;
    let mut calc = Calc::new(params).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    let entry = calc.load("av", &LoadOptions::default()).unwrap();
    assert_eq!(entry.units, "(vertical integral of m): m kg m^-2)");
    assert_eq!(entry.description, "rain");

    // Integrating ones gives ps / g everywhere.
    let data = stat(&entry);
    for value in data.iter() {
        assert!(approx_eq!(Float, *value, 1.0e5 / GRAV_EARTH, epsilon = 1.0e-6));
    }
}

#[test]
fn vertical_average_of_ones_is_one() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);
    params.var = Arc::new(Var::loaded("ones", "m", "ones", "atmos", true, true));
    params.dtype_in_vert = VerticalCoord::Sigma;
    params.dtype_out_vert = VertReduction::VertAv;
    let mut calc = Calc::new(params).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    let entry = calc.load("av", &LoadOptions::default()).unwrap();
    assert_eq!(entry.units, "m");
    for value in stat(&entry).iter() {
        assert!(approx_eq!(Float, *value, 1.0, epsilon = 1.0e-9));
    }
}

#[test]
fn empty_units_are_preserved() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);
    params.var = Arc::new(Var::loaded("mystery", "", "unlabeled", "atmos", true, false));
    let mut calc = Calc::new(params).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    let entry = calc.load("av", &LoadOptions::default()).unwrap();
    assert_eq!(entry.units, "");
    assert_eq!(entry.description, "unlabeled");
}

#[test]
fn load_reads_disk_then_falls_back_to_archive() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut computed = Calc::new(base_params(dir.path(), &["av"])).unwrap();
    computed.compute(&TestLoader::monthly(), true).unwrap();
    let reference = computed.load("av", &LoadOptions::default()).unwrap();

    // A fresh instance has an empty cache and reads the file.
    let mut fresh = Calc::new(base_params(dir.path(), &["av"])).unwrap();
    let from_disk = fresh.load("av", &LoadOptions::default()).unwrap();
    for (a, b) in stat(&reference).iter().zip(stat(&from_disk).iter()) {
        assert!(approx_eq!(Float, *a, *b, epsilon = 1.0e-12));
    }

    // With the working file gone, the archive serves the data.
    std::fs::remove_file(computed.path_out("av").unwrap()).unwrap();
    let mut fallback = Calc::new(base_params(dir.path(), &["av"])).unwrap();
    let from_tar = fallback.load("av", &LoadOptions::default()).unwrap();
    for (a, b) in stat(&reference).iter().zip(stat(&from_tar).iter()) {
        assert!(approx_eq!(Float, *a, *b, epsilon = 1.0e-12));
    }
}

#[test]
fn regional_results_merge_into_existing_files() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut params = base_params(dir.path(), &["reg.av"]);
    params.regions = vec![globe()];
    let mut first = Calc::new(params).unwrap();
    first.compute(&TestLoader::monthly(), false).unwrap();

    let mut params = base_params(dir.path(), &["reg.av"]);
    params.regions = vec![tropics()];
    let mut second = Calc::new(params).unwrap();
    second.compute(&TestLoader::monthly(), false).unwrap();

    // A fresh instance reading the shared file sees both regions.
    let mut params = base_params(dir.path(), &["reg.av"]);
    params.regions = vec![globe(), tropics()];
    let mut reader = Calc::new(params).unwrap();
    let entry = reader.load("reg.av", &LoadOptions::default()).unwrap();

    match &entry.payload {
        OutputPayload::Regional(regions) => {
            assert!(regions.contains_key("globe"));
            assert!(regions.contains_key("tropics"));
        }
        other => panic!("expected regional payload, got {:?}", other),
    }
}

#[test]
fn multi_tag_results_match_single_tag_runs() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut multi = Calc::new(base_params(&dir.path().join("multi"), &["av", "std"])).unwrap();
    multi.compute(&TestLoader::monthly(), false).unwrap();

    let mut single = Calc::new(base_params(&dir.path().join("single"), &["av"])).unwrap();
    single.compute(&TestLoader::monthly(), false).unwrap();

    let from_multi = multi.load("av", &LoadOptions::default()).unwrap();
    let from_single = single.load("av", &LoadOptions::default()).unwrap();
    for (a, b) in stat(&from_multi).iter().zip(stat(&from_single).iter()) {
        assert!(approx_eq!(Float, *a, *b, epsilon = 1.0e-12));
    }
}

#[test]
fn seasonal_interval_restricts_months() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);
    params.intvl_out = Interval::Season(Season::Jja);
    let mut calc = Calc::new(params).unwrap();

    calc.compute(&TestLoader::monthly(), false).unwrap();

    // JJA months all have the same value structure; equal-length June
    // and the 31-day July/August determine the weighted mean.
    let entry = calc.load("av", &LoadOptions::default()).unwrap();
    let expected: Float = {
        let mut num = 0.0;
        let mut den = 0.0;
        for month in [6u32, 7, 8] {
            let w = days_in_month(2004, month) as Float;
            num += w * (month as Float * 0.1 + 15.0 * 0.002);
            den += w;
        }
        num / den + 1.0
    };
    let data = stat(&entry);
    assert!(approx_eq!(Float, data[[0, 0, 0]], expected, epsilon = 1.0e-9));
}

#[test]
fn daily_input_supports_eddy_outputs() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["eddy.av", "ts"]);
    params.intvl_in = InputInterval::Daily;
    params.date_range = (stamp(2004, 1, 1), stamp(2004, 12, 31));
    let mut calc = Calc::new(params).unwrap();

    calc.compute(&TestLoader::daily(), false).unwrap();

    // Within each month the test data is linear in the day, so the
    // eddy values average out to ~0 over each month and hence the year.
    let entry = calc.load("eddy.av", &LoadOptions::default()).unwrap();
    for value in stat(&entry).iter() {
        assert!(value.abs() < 1.0e-9);
    }
}

#[test]
fn unknown_run_is_a_configuration_error() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);
    params.run = Arc::new(Run {
        name: "perturbed".to_string(),
        default_start_date: stamp(2004, 1, 1),
        default_end_date: stamp(2006, 12, 31),
    });

    match Calc::new(params) {
        Err(CalcError::Config(ConfigError::UnknownRun { model, run })) => {
            assert_eq!(model, "am2");
            assert_eq!(run, "perturbed");
        }
        other => panic!("expected an unknown-run error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn dataset_function_inputs_fail_fast() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);
    let mut var = Var::loaded("precip", "m", "rain", "atmos", true, false);
    var.func_input = FuncInputKind::Dataset;
    params.var = Arc::new(var);
    let mut calc = Calc::new(params).unwrap();

    let result = calc.compute(&TestLoader::monthly(), false);
    assert!(matches!(
        result,
        Err(CalcError::Input(InputError::DatasetInputUnimplemented))
    ));
}

#[test]
fn regional_tags_without_regions_are_rejected() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let params = base_params(dir.path(), &["reg.av"]);

    assert!(matches!(
        Calc::new(params),
        Err(CalcError::Config(ConfigError::InvalidOutputSpec { .. }))
    ));
}

#[test]
fn file_names_follow_the_naming_contract() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["reg.av"]);
    params.regions = vec![globe()];
    let calc = Calc::new(params).unwrap();

    assert_eq!(
        calc.file_name("reg.av").unwrap(),
        "precip.ann.reg.av.from_monthly_ts.am2.control.2004-2006.nc"
    );

    let mut params = base_params(dir.path(), &["av"]);
    params.ens_mem = Some(0);
    params.dtype_in_vert = VerticalCoord::Sigma;
    params.dtype_out_vert = VertReduction::VertInt;
    params.var = Arc::new(Var::loaded("precip", "m", "rain", "atmos", true, true));
    let calc = Calc::new(params).unwrap();

    assert_eq!(
        calc.file_name("av").unwrap(),
        "precip.ann.av.vert_int.from_monthly_ts_sigma.am2.control.mem1.2004-2006.nc"
    );
}

#[test]
fn derived_variable_functions_receive_all_operands() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path(), &["av"]);

    let rain = Arc::new(Var::loaded("precip", "m", "rain", "atmos", true, false));
    params.var = Arc::new(Var::computed(
        "double_precip",
        "m",
        "doubled rain",
        "atmos",
        true,
        false,
        vec![InputSpec::Field(rain), InputSpec::Constant(2.0)],
        Arc::new(|operands: &[Operand]| {
            let data = operands[0].series()?;
            let factor = operands[1].constant()?;
            Ok(data * factor)
        }),
    ));
    let mut doubled = Calc::new(params).unwrap();
    doubled.compute(&TestLoader::monthly(), false).unwrap();

    let mut plain = Calc::new(base_params(&dir.path().join("plain"), &["av"])).unwrap();
    plain.compute(&TestLoader::monthly(), false).unwrap();

    let doubled_entry = doubled.load("av", &LoadOptions::default()).unwrap();
    let plain_entry = plain.load("av", &LoadOptions::default()).unwrap();
    for (d, p) in stat(&doubled_entry).iter().zip(stat(&plain_entry).iter()) {
        assert!(approx_eq!(Float, *d, 2.0 * *p, epsilon = 1.0e-12));
    }
}
