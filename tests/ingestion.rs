use std::io::Write;

use geoanchor::{
    encoding::EncodingResolver,
    parse_bytes, parse_file,
    record::Section,
    topology::AnchorGraph,
    ParseOptions, ParseProgress, Warning, WarningKind,
};
use tempfile::NamedTempFile;

#[test]
fn gbk_stage_names_decode() {
    let (bytes, _, _) = encoding_rs::GBK.encode("STAGE, 1, 0, 初始地应力\nMADD, 1, 1, 1\n");
    let (model, diagnostics) = parse_bytes(&bytes, &ParseOptions::default()).unwrap();

    assert_eq!(model.info().encoding, "gb18030");
    assert!(!model.info().decode_fallback);
    assert_eq!(model.stages()[0].name, "初始地应力");
    assert_eq!(diagnostics.count(WarningKind::DecodeFallback), 0);
}

#[test]
fn undecodable_source_falls_back_with_warning() {
    let options = ParseOptions {
        encodings: EncodingResolver::from_labels(&["utf-8"]).unwrap(),
        ..ParseOptions::default()
    };
    let source = b"NODE, 1, 0, 0, 0\nSTAGE, 1, 0, bad \xFF name\n";
    let (model, diagnostics) = parse_bytes(source, &options).unwrap();

    assert!(model.info().decode_fallback);
    assert_eq!(model.nodes().len(), 1);
    assert_eq!(
        diagnostics
            .warnings()
            .iter()
            .find(|w| w.kind() == WarningKind::DecodeFallback),
        Some(&Warning::DecodeFallback {
            encoding: "UTF-8",
            replaced_lines: 1
        })
    );
}

#[test]
fn progress_reports_totals_from_a_file() {
    let mut file = NamedTempFile::new().unwrap();
    for id in 1..=25 {
        writeln!(file, "NODE, {id}, {id}.0, 0, 0").unwrap();
    }
    writeln!(file, "$$ Element").unwrap();
    writeln!(file, "LINE, 1, 15, 1, 2").unwrap();
    file.flush().unwrap();

    let options = ParseOptions {
        progress_interval: 10,
        ..ParseOptions::default()
    };
    let mut reports = Vec::new();
    let mut observer = |progress: &ParseProgress| {
        reports.push(progress.clone());
        std::ops::ControlFlow::Continue(())
    };
    let (model, _) = parse_file(file.path(), &options, &mut observer).unwrap();
    assert_eq!(model.nodes().len(), 25);

    let processed: Vec<_> = reports.iter().map(|p| p.processed_lines).collect();
    assert_eq!(processed, vec![10, 20, 27]);
    assert!(reports.iter().all(|p| p.total_lines == 27));
    assert_eq!(reports[1].nodes_so_far, 20);
    assert_eq!(reports[2].current_section, Section::Elements);
    assert_eq!(reports[2].elements_so_far, 1);
}

#[test]
fn rods_junctions_cycles_and_dangling_elements() {
    let source = "\
NODE, 1, 0, 0, 0
NODE, 2, 1, 0, 0
NODE, 3, 2, 0, 0
NODE, 4, 2, 1, 0
NODE, 5, 2, -1, 0
NODE, 10, 10, 0, 0
NODE, 11, 11, 0, 0
NODE, 12, 11, 1, 0
LINE, 1, 15, 1, 2
LINE, 2, 15, 2, 3
LINE, 3, 15, 3, 4
LINE, 4, 15, 3, 5
LINE, 5, 15, 10, 11
LINE, 6, 15, 11, 12
LINE, 7, 15, 12, 10
LINE, 8, 15, 5, 99
LINE, 9, 15, 4, 4
LINE, 10, 7, 1, 10
";
    let (model, diagnostics) = parse_bytes(source.as_bytes(), &ParseOptions::default()).unwrap();
    assert_eq!(diagnostics.count(WarningKind::ReferentialIntegrity), 1);
    assert!(model.element(8).unwrap().dangling);

    let graph = AnchorGraph::build(&model, 15);
    assert_eq!(graph.self_loops(), 1);
    assert_eq!(graph.dangling_elements(), 1);
    assert_eq!(graph.degree(3), 3);
    assert_eq!(graph.endpoints(), vec![1, 4, 5]);

    let rods = graph.components().rods;
    assert_eq!(rods.len(), 2);
    assert_eq!(rods[0].endpoints, vec![1, 4, 5]);
    assert_eq!(rods[0].nodes.len(), 5);
    assert!(rods[1].is_anomaly());
    assert_eq!(rods[1].nodes.len(), 3);
}

#[test]
fn unknown_tokens_and_bad_lines_keep_parsing() {
    let source = "\
NODE, 1, 0, 0, 0
NODE, 2, 1.0e, 0, 0
PLOAD, 1, 2, 3
NODE, 3, 2, 0, 0
HEXA, 9, 1, 1, 2
";
    let (model, diagnostics) = parse_bytes(source.as_bytes(), &ParseOptions::default()).unwrap();
    assert_eq!(model.nodes().keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(diagnostics.count(WarningKind::MalformedRecord), 2);
    assert!(model.elements().is_empty());
}
