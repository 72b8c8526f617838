mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{config, group, identity_mapping, jpeg, optional, persona, png, stored_files, talent_schema, text, values, SeqSlugs};
use resource_projection::domain::resource::{Advertised, File, Media, Paragraph, Profile, RichText, Span};
use resource_projection::storage::files;
use resource_projection::{
    Attr, EngineConfig, EngineError, Field, Fields, Group, ModeSchema, RequestContext, Resource, SqlValue,
    StorageError, TableTree, Validation, Validator, Value, WidgetKind,
};

fn media_field(name: &str, kinds: &[&str], max_kb: i64) -> Field {
    let mut image = Field::new("image", WidgetKind::File);
    image.max = max_kb;
    let mut f = values(
        group(
            name,
            0,
            vec![
                optional(text("alttext")),
                optional(text("title")),
                optional(text("project")),
                optional(text("info")),
                image,
            ],
        ),
        kinds,
    );
    for v in f.values.iter_mut() {
        v.text = v.name.clone();
    }
    f
}

fn gallery_schema(kinds: &[&str], max_kb: i64) -> ModeSchema {
    let mut attachment = optional(Field::new("attachment", WidgetKind::File));
    attachment.max = 512;
    let editor = Fields::new(vec![
        media_field("cover", kinds, max_kb),
        media_field("banner", kinds, max_kb),
        attachment,
        optional(text("caption")),
    ]);
    let mut mapping = identity_mapping(&["attachment", "caption"]);
    for m in ["cover", "banner"] {
        for suffix in ["", ".alttext", ".title", ".project", ".info"] {
            mapping.insert(format!("{m}{suffix}"), format!("{m}{suffix}"));
        }
    }
    ModeSchema::new("gallery", "gallery", editor, mapping)
}

fn upload(bytes: Vec<u8>, title: &str) -> Value {
    Value::Media(Box::new(Media {
        title: title.into(),
        info: "Painted in a week".into(),
        file: File::upload(bytes),
        ..Media::default()
    }))
}

fn stored(name: &str) -> Value {
    Value::Media(Box::new(Media {
        file: File::stored(name),
        ..Media::default()
    }))
}

fn gallery(attrs: Vec<Attr>) -> Resource {
    let mut body = Group::new("gallery");
    body.attrs = attrs;
    Resource::new("gallery", persona(1, false), body)
}

fn validator(root: &Path, slugs: SeqSlugs) -> Validator {
    Validator::new(Arc::new(config(root)), Arc::new(slugs))
}

fn validate(v: &Validator, schema: &ModeSchema, attrs: Vec<Attr>) -> Result<Validation, EngineError> {
    v.validate(&gallery(attrs), schema, &RequestContext::new("req-media"))
}

fn node<'t>(tree: &'t TableTree, name: &str) -> &'t TableTree {
    tree.children
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no child {name:?}"))
}

fn text_of(t: &TableTree, column: &str) -> String {
    t.get(column).and_then(SqlValue::as_str).unwrap_or_default().to_string()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn feedback(v: &Validation, key: &str) -> String {
    v.feedback.get(key).unwrap_or_else(|| panic!("no feedback under {key:?}: {:?}", v.feedback))[0].clone()
}

#[test]
fn jpeg_upload_writes_stamped_full_image_and_thumbnail() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(jpeg(64, 32), "Sunset"))],
    )
    .unwrap();

    assert!(out.is_accepted(), "{:?}", out.feedback);
    assert_eq!(stored_files(root.path()), vec!["s000001.jpeg", "s000001_thumb.jpeg"]);
    assert_eq!(out.tree.written.len(), 2);
    assert!(out.tree.written.iter().all(|p| Path::new(p).starts_with(root.path())));
    assert!(out.tree.retained.is_empty());

    let cover = node(&out.tree, "gallery_cover");
    assert_eq!(text_of(cover, "filename"), "s000001.jpeg");
    assert_eq!(text_of(cover, "title"), "Sunset");
    assert_eq!(text_of(cover, "kind"), "image");
    assert_eq!(text_of(cover, "format"), "jpeg");
    assert_eq!(cover.get("aspect"), Some(&SqlValue::Float(2.0)));
    // the artist is stamped into the file, never stored as a column
    assert!(cover.get("artist").is_none());
    assert!(cover.get("file").is_none());

    for name in ["s000001.jpeg", "s000001_thumb.jpeg"] {
        let bytes = fs::read(root.path().join(name)).unwrap();
        assert!(contains(&bytes, b"Exif\0\0"), "{name} has no EXIF block");
        assert!(contains(&bytes, b"Sunset by handle1 on StoryDevs"));
        assert!(contains(&bytes, b"Painted in a week"));
        assert!(image::load_from_memory(&bytes).is_ok());
    }
    assert_eq!(out.tree.declared_children, vec!["gallery_cover"]);
}

#[test]
fn png_upload_is_stored_in_the_smaller_encoding() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(png(64, 32), "Dawn"))],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);

    let cover = node(&out.tree, "gallery_cover");
    let format = text_of(cover, "format");
    assert!(format == "jpeg" || format == "png", "unexpected format {format}");
    let name = text_of(cover, "filename");
    assert_eq!(name, format!("s000001.{format}"));
    assert_eq!(
        stored_files(root.path()),
        vec![format!("s000001.{format}"), format!("s000001_thumb.{format}")]
    );
    let bytes = fs::read(root.path().join(&name)).unwrap();
    assert!(contains(&bytes, b"Dawn by handle1 on StoryDevs"));
}

#[test]
fn large_uploads_get_a_bounded_thumbnail() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let out = validate(
        &v,
        &gallery_schema(&["image"], 4096),
        vec![Attr::new("cover", upload(jpeg(800, 400), "Wide"))],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);

    let thumb = image::open(root.path().join("s000001_thumb.jpeg")).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (320, 160));
    let full = image::open(root.path().join("s000001.jpeg")).unwrap();
    assert_eq!((full.width(), full.height()), (800, 400));
}

#[test]
fn upload_problems_are_feedback() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());

    let out = validate(
        &v,
        &gallery_schema(&["video"], 2048),
        vec![Attr::new("cover", upload(jpeg(16, 16), "x"))],
    )
    .unwrap();
    assert_eq!(feedback(&out, "cover"), "Field \"cover\" contains disallowed file kind \"image\".");

    let out = validate(
        &v,
        &gallery_schema(&["image"], 1),
        vec![Attr::new("cover", upload(jpeg(256, 256), "x"))],
    )
    .unwrap();
    assert!(feedback(&out, "cover")
        .starts_with("Field \"cover\" disallows files larger than 1KiB for kind \"image\", got "));

    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(b"definitely not an image".to_vec(), "x"))],
    )
    .unwrap();
    assert_eq!(feedback(&out, "cover"), "Field \"cover\" contains unknown or malformed file format.");

    let mut broken = vec![0xFF, 0xD8, 0xFF, 0xE0];
    broken.extend_from_slice(&[0u8; 64]);
    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(broken, "x"))],
    )
    .unwrap();
    assert_eq!(feedback(&out, "cover"), "Field \"cover\" contains unknown or malformed file format.");

    assert!(stored_files(root.path()).is_empty());
}

#[test]
fn non_optional_media_needs_a_file() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", Value::Media(Box::default()))],
    )
    .unwrap();
    assert_eq!(feedback(&out, "cover"), "Non optional Media field \"cover\" contains no media.");
}

#[test]
fn stored_media_is_retained() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("abc123.jpeg"), jpeg(40, 20)).unwrap();
    let v = validator(root.path(), SeqSlugs::new());

    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", stored("abc123.jpeg"))],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);
    assert_eq!(out.tree.retained, vec!["abc123.jpeg"]);
    assert!(out.tree.written.is_empty());

    let cover = node(&out.tree, "gallery_cover");
    assert_eq!(text_of(cover, "filename"), "abc123.jpeg");
    assert_eq!(text_of(cover, "format"), "jpeg");
    assert_eq!(cover.get("aspect"), Some(&SqlValue::Float(2.0)));
    assert_eq!(stored_files(root.path()), vec!["abc123.jpeg"]);
}

#[test]
fn stored_media_names_are_checked() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let s = gallery_schema(&["image"], 2048);

    for bad in ["../etc.jpeg", "abc.gif", "ab_c.jpeg", "abc.jpeg.png"] {
        let out = validate(&v, &s, vec![Attr::new("cover", stored(bad))]).unwrap();
        assert_eq!(feedback(&out, "cover"), "Malformed media file name at \"cover\".", "{bad}");
    }

    let out = validate(&v, &s, vec![Attr::new("cover", stored("zzz999.jpeg"))]).unwrap();
    assert_eq!(feedback(&out, "cover"), "File zzz999.jpeg at \"cover\" does not exist.");
}

#[test]
fn media_is_either_a_file_or_rich_text() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let s = gallery_schema(&["image"], 2048);
    let text = RichText(vec![Paragraph::new("p", vec![Span::plain("A short story.")])]);

    for file in [File::stored("../../etc/passwd"), File::upload(jpeg(40, 20))] {
        let both = Value::Media(Box::new(Media {
            file,
            rich_text: text.clone(),
            ..Media::default()
        }));
        let out = validate(&v, &s, vec![Attr::new("cover", both)]).unwrap();
        assert_eq!(
            feedback(&out, "cover"),
            "Media field \"cover\" contains both rich text and a file."
        );
        assert!(out.tree.retained.is_empty());
    }
    assert!(stored_files(root.path()).is_empty());
}

#[test]
fn storage_root_must_be_absolute() {
    assert!(EngineConfig::default().storage_root.is_absolute());
    let err = files::resolve(Path::new("uploads"), "abc123.jpeg").unwrap_err();
    assert!(matches!(err, StorageError::RelativeRoot(_)));
    assert!(!err.is_retryable());

    let root = tempfile::tempdir().unwrap();
    assert_eq!(
        files::resolve(root.path(), "abc123.jpeg").unwrap(),
        root.path().join("abc123.jpeg")
    );
}

#[test]
fn plain_file_uploads_keep_their_encoding_without_metadata() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![
            Attr::new("cover", upload(jpeg(16, 16), "c")),
            Attr::new("attachment", Value::File(File::upload(png(10, 10)))),
        ],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);

    assert_eq!(out.tree.get("attachment"), Some(&SqlValue::from("s000002.png")));
    let bytes = fs::read(root.path().join("s000002.png")).unwrap();
    assert!(!contains(&bytes, b"tEXt"));
    assert!(root.path().join("s000002_thumb.png").is_file());
    assert_eq!(out.tree.written.len(), 4);
}

#[test]
fn plain_stored_file_is_retained() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("doc1.png"), png(4, 4)).unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let s = gallery_schema(&["image"], 2048);

    let out = validate(
        &v,
        &s,
        vec![
            Attr::new("cover", upload(jpeg(16, 16), "c")),
            Attr::new("attachment", Value::File(File::stored("doc1.png"))),
        ],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);
    assert_eq!(out.tree.get("attachment"), Some(&SqlValue::from("doc1.png")));
    assert_eq!(out.tree.retained, vec!["doc1.png"]);

    let out = validate(
        &v,
        &s,
        vec![
            Attr::new("cover", upload(jpeg(16, 16), "c")),
            Attr::new("attachment", Value::File(File::stored("a/b.png"))),
        ],
    )
    .unwrap();
    assert_eq!(feedback(&out, "attachment"), "Malformed file name at \"attachment\".");
}

#[test]
fn later_feedback_removes_every_file_written_so_far() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let mut s = gallery_schema(&["image"], 2048);
    s.editor.field_mut("caption").unwrap().optional = false;

    let out = validate(
        &v,
        &s,
        vec![
            Attr::new("cover", upload(jpeg(32, 32), "one")),
            Attr::new("banner", upload(jpeg(32, 32), "two")),
            Attr::new("caption", Value::text("")),
        ],
    )
    .unwrap();
    assert_eq!(feedback(&out, "caption"), "Non-optional field \"caption\" is empty.");
    assert!(out.tree.written.is_empty());
    assert!(stored_files(root.path()).is_empty());
}

#[test]
fn later_fatal_error_removes_every_file_written_so_far() {
    let root = tempfile::tempdir().unwrap();
    let v = validator(root.path(), SeqSlugs::new());
    let err = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![
            Attr::new("cover", upload(jpeg(32, 32), "one")),
            Attr::new("banner", upload(jpeg(32, 32), "two")),
            Attr::new("unmapped", Value::text("boom")),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Unmapped(_)));
    assert!(stored_files(root.path()).is_empty());
}

#[test]
fn name_collisions_retry_with_a_fresh_name() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("taken.jpeg"), b"occupied").unwrap();
    let v = validator(root.path(), SeqSlugs::scripted(["taken"]));

    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(jpeg(16, 16), "x"))],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);
    assert_eq!(text_of(node(&out.tree, "gallery_cover"), "filename"), "s000001.jpeg");
    assert_eq!(fs::read(root.path().join("taken.jpeg")).unwrap(), b"occupied");
}

#[test]
fn thumbnail_collision_removes_the_half_written_pair() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("taken_thumb.jpeg"), b"occupied").unwrap();
    let v = validator(root.path(), SeqSlugs::scripted(["taken"]));

    let out = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(jpeg(16, 16), "x"))],
    )
    .unwrap();
    assert!(out.is_accepted(), "{:?}", out.feedback);
    assert_eq!(
        stored_files(root.path()),
        vec!["s000001.jpeg", "s000001_thumb.jpeg", "taken_thumb.jpeg"]
    );
}

#[test]
fn exhausted_disk_retries_are_fatal() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("taken.jpeg"), b"occupied").unwrap();
    let v = validator(root.path(), SeqSlugs::scripted(["taken", "taken", "taken"]));

    let err = validate(
        &v,
        &gallery_schema(&["image"], 2048),
        vec![Attr::new("cover", upload(jpeg(16, 16), "x"))],
    )
    .unwrap_err();
    match &err {
        EngineError::DiskWrite { format, source } => {
            assert_eq!(format, "JPEG");
            assert_eq!(source.attempts(), 3);
        }
        other => panic!("expected disk write failure, got {other:?}"),
    }
    assert_eq!(err.to_string(), "Unable to save JPEG to disk.");
    assert_eq!(stored_files(root.path()), vec!["taken.jpeg"]);
}

fn example(title: &str) -> Media {
    Media {
        title: title.into(),
        file: File::upload(jpeg(24, 24)),
        ..Media::default()
    }
}

fn talent_profile(advertised: Vec<Advertised>) -> Resource {
    let profile = Profile {
        available: true,
        visibility: "public".into(),
        name: Some("Alice".into()),
        advertised,
        ..Profile::default()
    };
    Resource::from_shape(persona(1, false), &profile)
}

fn advertised(skill: &str, examples: usize) -> Advertised {
    Advertised {
        skill: skill.into(),
        example: (0..examples).map(|i| example(&format!("Piece {i}"))).collect(),
    }
}

fn run_talent(root: &Path, r: &Resource) -> Validation {
    validator(root, SeqSlugs::new())
        .validate(r, &talent_schema(), &RequestContext::new("req-talent"))
        .unwrap()
}

#[test]
fn talent_examples_match_their_skill() {
    let root = tempfile::tempdir().unwrap();
    let out = run_talent(root.path(), &talent_profile(vec![advertised("art", 2)]));
    assert!(out.is_accepted(), "{:?}", out.feedback);

    let ad = node(&out.tree, "profile_advertised");
    assert_eq!(text_of(ad, "skill"), "art");
    let examples: Vec<_> = ad.children.iter().filter(|c| c.name == "profile_advertised_example").collect();
    assert_eq!(examples.len(), 2);
    assert!(examples.iter().all(|e| text_of(e, "kind") == "image"));
    assert_eq!(stored_files(root.path()).len(), 4);
}

#[test]
fn talent_rules_reject_and_clean_up() {
    let cases = [
        (
            vec![advertised("writing", 2)],
            "advertised.example",
            "Skill \"writing\" only allows kind \"text\", got \"image\".",
        ),
        (
            vec![advertised("art", 2), advertised("art", 2)],
            "advertised.skill",
            "Skill \"art\" has duplicate(s).",
        ),
        (
            vec![advertised("dance", 2)],
            "advertised.skill",
            "Skill \"dance\" is not a known skill.",
        ),
        (
            vec![advertised("art", 1)],
            "advertised.example",
            "Example \"art\" expected 2 instances, got 1.",
        ),
    ];
    for (ads, key, msg) in cases {
        let root = tempfile::tempdir().unwrap();
        let out = run_talent(root.path(), &talent_profile(ads));
        assert_eq!(feedback(&out, key), msg);
        assert!(stored_files(root.path()).is_empty(), "{msg}");
    }
}

#[test]
fn too_many_examples_are_rejected_by_the_walk() {
    let root = tempfile::tempdir().unwrap();
    let out = run_talent(root.path(), &talent_profile(vec![advertised("art", 3)]));
    assert_eq!(
        feedback(&out, "advertised.example"),
        "Field \"advertised.example\" exceeds maximum allowed elements. Max 2, got 3."
    );
    assert!(stored_files(root.path()).is_empty());
}
