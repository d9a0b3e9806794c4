use suite_scheduler::core::mode::{self, EffectiveMode, ExecutionMode};

#[test]
fn test_explicit_modes() {
    assert_eq!(ExecutionMode::Parallel.explicit(), Some(EffectiveMode::Parallel));
    assert_eq!(ExecutionMode::Sequential.explicit(), Some(EffectiveMode::Sequential));
    assert_eq!(ExecutionMode::Inherited.explicit(), None);
}

#[test]
fn test_innermost_explicit_mode_wins() {
    let chain = [
        ExecutionMode::Inherited,
        ExecutionMode::Sequential,
        ExecutionMode::Parallel,
    ];
    assert_eq!(
        mode::resolve(chain, EffectiveMode::Parallel),
        EffectiveMode::Sequential
    );
}

#[test]
fn test_all_inherited_falls_back_to_default() {
    let chain = [ExecutionMode::Inherited, ExecutionMode::Inherited];
    assert_eq!(
        mode::resolve(chain, EffectiveMode::Sequential),
        EffectiveMode::Sequential
    );
    assert_eq!(
        mode::resolve(Vec::<ExecutionMode>::new(), EffectiveMode::Parallel),
        EffectiveMode::Parallel
    );
}

#[test]
fn test_defaults_and_display() {
    assert_eq!(ExecutionMode::default(), ExecutionMode::Inherited);
    assert_eq!(EffectiveMode::default(), EffectiveMode::Parallel);
    assert_eq!(ExecutionMode::Sequential.to_string(), "sequential");
    assert_eq!(EffectiveMode::Parallel.to_string(), "parallel");
}

#[test]
fn test_modes_deserialize_lowercase() {
    #[derive(serde::Deserialize)]
    struct Holder {
        mode: ExecutionMode,
    }
    let holder: Holder = toml::from_str("mode = \"inherited\"").unwrap();
    assert_eq!(holder.mode, ExecutionMode::Inherited);
}
