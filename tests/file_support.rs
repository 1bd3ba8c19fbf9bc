//! Integration tests for multi-format document support: pdf, docx, pptx and
//! csv through `docqa ingest`, mixed-format index builds, and per-file failures.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("docqa");
    path
}

fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// PDF with one page per entry, each page drawing its text in Courier.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Minimal docx with one `<w:p>` per paragraph.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    zip_with(&[("word/document.xml", xml)])
}

/// Minimal pptx: one slide per entry, one text shape per string.
fn minimal_pptx(slides: &[&[&str]]) -> Vec<u8> {
    let entries: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, shapes)| {
            let shapes: String = shapes
                .iter()
                .map(|text| {
                    format!(
                        "<p:sp><p:txBody><a:bodyPr/><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp>",
                        text
                    )
                })
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><p:sld xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"><p:cSld><p:spTree>{}</p:spTree></p:cSld></p:sld>",
                shapes
            );
            (format!("ppt/slides/slide{}.xml", i + 1), xml)
        })
        .collect();
    let refs: Vec<(&str, String)> = entries
        .iter()
        .map(|(name, xml)| (name.as_str(), xml.clone()))
        .collect();
    zip_with(&refs)
}

fn setup_mixed_env(max_file_bytes: Option<u64>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let ingest = max_file_bytes
        .map(|n| format!("[ingest]\nmax_file_bytes = {}\n", n))
        .unwrap_or_default();
    let config_content = format!(
        r#"[documents]
root = "{root}/data"
include_globs = ["**/*.txt", "**/*.md", "**/*.docx", "**/*.pptx", "**/*.csv", "**/*.pdf"]

[index]
dir = "{root}/index"

[embedding]
provider = "hash"

{ingest}
"#,
        root = root.display(),
        ingest = ingest
    );
    let config_path = root.join("config").join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    fs::write(
        root.join("data").join("readme.md"),
        "# Readme\n\nPlain text file for tests.\n",
    )
    .unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(docqa_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn ingested_text(config_path: &Path, file: &Path) -> String {
    let (stdout, stderr, success) = run_docqa(config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: stderr={}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    json["payload"]["text"].as_str().unwrap().to_string()
}

#[test]
fn pdf_pages_come_back_in_page_order() {
    let (tmp, _config_path) = setup_mixed_env(None);
    let file = tmp.path().join("data").join("manual.pdf");
    fs::write(
        &file,
        pdf_with_pages(&["alpha turbine maintenance", "beta compressor schedule"]),
    )
    .unwrap();

    let text = squash_whitespace(&docqa::parser::parse_file(&file).unwrap());
    let first = text.find("alpha turbine maintenance").expect("page 1 text");
    let second = text.find("beta compressor schedule").expect("page 2 text");
    assert!(first < second, "pages out of order: {:?}", text);
}

#[test]
fn pdf_build_and_search() {
    let (tmp, config_path) = setup_mixed_env(None);
    fs::write(
        tmp.path().join("data").join("manual.pdf"),
        pdf_with_pages(&["alpha turbine maintenance", "beta compressor schedule"]),
    )
    .unwrap();

    let (stdout, stderr, success) = run_docqa(&config_path, &["index", "build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 2"), "{}", stdout);

    let (stdout, _, success) =
        run_docqa(&config_path, &["query", "compressor schedule", "--k", "1"]);
    assert!(success);
    assert!(stdout.contains("manual.pdf"), "{}", stdout);
}

#[test]
fn docx_paragraphs_are_newline_joined() {
    let (tmp, config_path) = setup_mixed_env(None);
    let file = tmp.path().join("data").join("notes.docx");
    fs::write(&file, minimal_docx(&["office test phrase", "second paragraph"])).unwrap();

    assert_eq!(
        ingested_text(&config_path, &file),
        "office test phrase\nsecond paragraph"
    );
}

#[test]
fn pptx_slides_in_order_with_trailing_newlines() {
    let (tmp, config_path) = setup_mixed_env(None);
    let file = tmp.path().join("data").join("deck.pptx");
    fs::write(
        &file,
        minimal_pptx(&[&["Quarterly review", "Revenue grew"], &["Next steps"]]),
    )
    .unwrap();

    assert_eq!(
        ingested_text(&config_path, &file),
        "Quarterly review\nRevenue grew\nNext steps\n"
    );
}

#[test]
fn csv_renders_aligned_table() {
    let (tmp, config_path) = setup_mixed_env(None);
    let file = tmp.path().join("data").join("stock.csv");
    fs::write(&file, "item,count\nbolts,7\nwashers,12\n").unwrap();

    assert_eq!(
        ingested_text(&config_path, &file),
        "   item count\n  bolts     7\nwashers    12"
    );
}

#[test]
fn mixed_formats_build_and_search() {
    let (tmp, config_path) = setup_mixed_env(None);
    let data = tmp.path().join("data");
    fs::write(data.join("spec.docx"), minimal_docx(&["office test phrase"])).unwrap();
    fs::write(data.join("deck.pptx"), minimal_pptx(&[&["slide about turbines"]])).unwrap();
    fs::write(data.join("stock.csv"), "item,count\nbolts,7\n").unwrap();

    let (stdout, stderr, success) = run_docqa(&config_path, &["index", "build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 4"), "{}", stdout);

    let (stdout, _, success) = run_docqa(&config_path, &["query", "office test phrase", "--k", "1"]);
    assert!(success);
    assert!(stdout.contains("spec.docx"), "{}", stdout);

    let (stdout, _, success) = run_docqa(&config_path, &["query", "turbines", "--k", "1"]);
    assert!(success);
    assert!(stdout.contains("deck.pptx"), "{}", stdout);
}

#[test]
fn corrupt_pdf_is_skipped_during_build() {
    let (tmp, config_path) = setup_mixed_env(None);
    let data = tmp.path().join("data");
    fs::write(data.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(data.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    let (stdout, stderr, success) = run_docqa(&config_path, &["index", "build"]);
    assert!(success, "build must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 2"), "{}", stdout);
    assert!(stderr.contains("bad.pdf"), "{}", stderr);
}

#[test]
fn corrupt_docx_fails_ingest() {
    let (tmp, config_path) = setup_mixed_env(None);
    let file = tmp.path().join("data").join("broken.docx");
    fs::write(&file, b"PK not really a zip").unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("failed to parse"), "{}", stderr);
}

#[test]
fn oversized_file_is_skipped() {
    let (tmp, config_path) = setup_mixed_env(Some(1000));
    let data = tmp.path().join("data");
    fs::write(data.join("big.txt"), "word ".repeat(400)).unwrap();
    fs::write(data.join("small.md"), "# Small\n\nOk.\n").unwrap();

    let (stdout, stderr, success) = run_docqa(&config_path, &["index", "build"]);
    assert!(success, "build must succeed: stderr={}", stderr);
    assert!(stdout.contains("documents: 2"), "{}", stdout);
    assert!(stderr.contains("big.txt"), "{}", stderr);
}

#[test]
fn every_file_failing_fails_the_build() {
    let (tmp, config_path) = setup_mixed_env(None);
    let data = tmp.path().join("data");
    fs::remove_file(data.join("readme.md")).unwrap();
    fs::write(data.join("bad.pdf"), b"not a valid pdf").unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["index", "build"]);
    assert!(!success);
    assert!(stderr.contains("failed to ingest"), "{}", stderr);
    assert!(!tmp.path().join("index").exists());
}

#[test]
fn persisted_index_survives_every_source_failing() {
    let (tmp, config_path) = setup_mixed_env(None);
    let data = tmp.path().join("data");
    fs::write(data.join("notes.txt"), "Pumps need priming before startup.").unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["index", "build"]);
    assert!(success, "build failed: {}", stderr);

    fs::write(data.join("readme.md"), [0xff, 0xfe, 0x00]).unwrap();
    fs::write(data.join("notes.txt"), [0xff, 0xfe, 0x00]).unwrap();

    let (stdout, stderr, success) = run_docqa(&config_path, &["query", "pumps priming", "--k", "1"]);
    assert!(success, "query must use the persisted index: stderr={}", stderr);
    assert!(stdout.contains("notes.txt"), "{}", stdout);

    let (stdout, stderr, success) = run_docqa(&config_path, &["index", "status"]);
    assert!(success, "status failed: stderr={}", stderr);
    assert!(stdout.contains("state: persisted"), "{}", stdout);
}
