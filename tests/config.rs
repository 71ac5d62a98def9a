//! Dotted-path options and the settings built from them.

mod common;

use fieldopt::config::Config;
use fieldopt::linear::LinearBackend;
use fieldopt::polycube::PolycubeSolver;
use fieldopt::types::{AugmentedLagrangianOptions, Error};
use serde_json::json;

#[test]
fn nested_values_resolve_by_dotted_path() {
    let config = common::config();
    assert_eq!(config.get::<f64>("weight.smooth.value").unwrap(), 1.0);
    assert_eq!(config.get::<usize>("lbfgs.maxits.value").unwrap(), 200);
    assert_eq!(config.get::<String>("lins.type.value").unwrap(), "cholesky");
    assert!(config.contains("abs_eps.value"));
    assert!(!config.contains("abs_eps.missing"));
}

#[test]
fn missing_and_mistyped_options() {
    let config = Config::from_value(json!({
        "lbfgs": { "maxits": { "value": "many" } },
        "weight": { "area": { "value": null } },
    }));
    assert!(matches!(
        config.get::<f64>("weight.smooth.value"),
        Err(Error::MissingOption(key)) if key == "weight.smooth.value"
    ));
    assert!(matches!(
        config.get::<usize>("lbfgs.maxits.value"),
        Err(Error::InvalidOption { key, .. }) if key == "lbfgs.maxits.value"
    ));
    assert!(matches!(
        config.get_or::<usize>("lbfgs.maxits.value", 5),
        Err(Error::InvalidOption { .. })
    ));
    assert_eq!(config.get_or("weight.area.value", 10.0).unwrap(), 10.0);
    assert_eq!(config.get_or("lbfgs.memory.value", 7usize).unwrap(), 7);
}

#[test]
fn config_loads_from_a_file() {
    let path = std::env::temp_dir().join(format!("fieldopt-config-{}.json", std::process::id()));
    std::fs::write(&path, common::base_config().to_string()).unwrap();
    let config = Config::from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.get::<f64>("abs_eps.value").unwrap(), 1e-3);

    assert!(matches!(
        Config::from_path(std::env::temp_dir().join("fieldopt-no-such-file.json")),
        Err(Error::Io(_))
    ));
    assert!(matches!(Config::from_json_str("{ not json"), Err(Error::Json(_))));
}

#[test]
fn linear_backend_from_config() {
    assert_eq!(LinearBackend::from_config(&Config::default()).unwrap(), LinearBackend::Cholesky);
    assert_eq!(LinearBackend::from_config(&common::config()).unwrap(), LinearBackend::Cholesky);

    let cg = Config::from_value(json!({
        "lins": {
            "type": { "value": "cg" },
            "tol": { "value": 1e-6 },
            "maxits": { "value": 50 },
        }
    }));
    assert_eq!(
        LinearBackend::from_config(&cg).unwrap(),
        LinearBackend::ConjugateGradient {
            tolerance: 1e-6,
            max_iterations: 50,
        }
    );

    let unknown = Config::from_value(json!({ "lins": { "type": { "value": "umfpack" } } }));
    assert!(matches!(
        LinearBackend::from_config(&unknown),
        Err(Error::InvalidOption { key, .. }) if key == "lins.type.value"
    ));
}

#[test]
fn lagrangian_settings_read_as_one_block() {
    let defaults = AugmentedLagrangianOptions::default();
    let mesh = common::kuhn_cube();
    let solver = PolycubeSolver::new(&mesh, &common::config()).unwrap();
    assert_eq!(*solver.lagrangian(), defaults);

    let mut raw = common::base_config();
    raw["lagrangian"] = json!({ "mu_factor": 4.0, "max_outer_iters": 3 });
    let solver = PolycubeSolver::new(&mesh, &Config::from_value(raw.clone())).unwrap();
    assert_eq!(
        *solver.lagrangian(),
        AugmentedLagrangianOptions {
            mu_factor: 4.0,
            max_outer_iters: 3,
            ..defaults
        }
    );

    raw["weight"]["area"] = json!({ "value": 2.5 });
    let solver = PolycubeSolver::new(&mesh, &Config::from_value(raw.clone())).unwrap();
    assert_eq!(solver.lagrangian().mu_init, 2.5);
    assert_eq!(solver.lagrangian().max_outer_iters, 3);

    raw["lagrangian"] = json!({ "mu_max": "large" });
    assert!(matches!(
        PolycubeSolver::new(&mesh, &Config::from_value(raw)),
        Err(Error::InvalidOption { key, .. }) if key == "lagrangian"
    ));
}
