#[test]
fn blit_wgsl_parses_and_exposes_every_mode() {
    let source = include_str!("blit.wgsl");
    let module = parse_wgsl("blit.wgsl", source);
    let entry_points: Vec<&str> = module
        .entry_points
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    for expected in [
        "vs_main",
        "fs_identity",
        "fs_gamma_to_linear",
        "fs_linear_to_gamma",
    ] {
        assert!(
            entry_points.contains(&expected),
            "blit.wgsl is missing entry point {expected}"
        );
    }
}

fn parse_wgsl(label: &str, source: &str) -> naga::Module {
    naga::front::wgsl::parse_str(source).unwrap_or_else(|error| {
        panic!(
            "WGSL parse failed for {label}: {}",
            error.emit_to_string(source)
        )
    })
}
