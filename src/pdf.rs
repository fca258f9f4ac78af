//! PDF assembly
//!
//! One page per image, sized so the image renders at the configured DPI.
//! Images are embedded either losslessly (raw RGB, Flate) or as JPEG
//! (DCTDecode). With compression enabled both documents are built and the
//! smaller one is written; JPEG never replaces a smaller lossless file.

use std::{
    fs::OpenOptions,
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Local};
use image::RgbImage;
use lopdf::{
    Document, Object, Stream, StringFormat,
    content::{Content, Operation},
    dictionary,
};

use crate::{
    config::Config,
    error::{AssemblyError, NamingError},
    model::{CaptureFrame, PdfArtifact, ProcessedPage},
    naming::{self, NamingContext},
    util::encode::encode_jpeg_rgb,
};

/// Options for one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyRequest {
    /// Document title; the configured default when `None`
    pub title:           Option<String>,
    /// Try lossy compression; the configured default when `None`
    pub compress:        Option<bool>,
    /// Embed enhanced images where available
    pub prefer_enhanced: bool,
    /// Write a `.txt` sidecar with the OCR text
    pub write_text:      bool,
    /// Session id for `{session}` and session subdirectories
    pub session:         Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Embedding {
    Lossless,
    Jpeg(u8),
}

/// Builds PDFs from processed pages
#[derive(Debug, Clone)]
pub struct PdfAssembler {
    config: Arc<Config>,
}

impl PdfAssembler {
    /// Creates an assembler using `config` for naming, DPI and compression
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Assembles raw frames, without OCR text
    ///
    /// # Errors
    ///
    /// See [`PdfAssembler::assemble`].
    pub fn assemble_frames(
        &self,
        frames: &[CaptureFrame],
        request: &AssemblyRequest,
    ) -> Result<PdfArtifact, AssemblyError> {
        let pages: Vec<ProcessedPage> = frames.iter().cloned().map(ProcessedPage::raw).collect();
        self.assemble(&pages, request)
    }

    /// Assembles pages into a new PDF under the output directory
    ///
    /// Pages are ordered by frame index regardless of input order.
    ///
    /// # Errors
    ///
    /// - [`AssemblyError::NoPages`] - `pages` is empty
    /// - [`AssemblyError::ImageLoad`] - a page image cannot be decoded
    /// - [`AssemblyError::OutputExists`] - target exists and collisions fail
    /// - [`AssemblyError::Pdf`] / [`AssemblyError::Io`] - writing failed
    pub fn assemble(&self, pages: &[ProcessedPage], request: &AssemblyRequest) -> Result<PdfArtifact, AssemblyError> {
        self.assemble_at(pages, request, Local::now())
    }

    /// Like [`PdfAssembler::assemble`] with a fixed clock
    pub fn assemble_at(
        &self,
        pages: &[ProcessedPage],
        request: &AssemblyRequest,
        now: DateTime<Local>,
    ) -> Result<PdfArtifact, AssemblyError> {
        if pages.is_empty() {
            return Err(AssemblyError::NoPages);
        }

        let mut ordered: Vec<&ProcessedPage> = pages.iter().collect();
        ordered.sort_by_key(|p| p.frame.index);

        let sources: Vec<PathBuf> = ordered
            .iter()
            .map(|page| page.image_path(request.prefer_enhanced).to_path_buf())
            .collect();
        let images = sources
            .iter()
            .map(|path| load_rgb(path))
            .collect::<Result<Vec<_>, _>>()?;

        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.config.pdf_title.clone());
        let dpi = self.config.pdf_dpi.max(1);

        let lossless = build_document(&images, &title, dpi, Embedding::Lossless, &now)?;
        let mut bytes = lossless;
        let mut compressed = false;

        if request.compress.unwrap_or(self.config.pdf_compression) {
            match build_document(&images, &title, dpi, Embedding::Jpeg(self.config.image_quality), &now) {
                Ok(lossy) if lossy.len() < bytes.len() => {
                    tracing::debug!("JPEG embedding saves {} bytes", bytes.len() - lossy.len());
                    bytes = lossy;
                    compressed = true;
                }
                Ok(lossy) => {
                    tracing::debug!(
                        "JPEG embedding not smaller ({} >= {} bytes); keeping lossless",
                        lossy.len(),
                        bytes.len()
                    );
                }
                Err(e) => tracing::warn!("Compressed build failed, keeping lossless: {}", e),
            }
        }

        let path = self.output_path(&title, request.session.as_deref(), &now)?;
        write_new(&path, &bytes)?;

        let text = collect_text(&ordered);
        let text_path = match (&text, request.write_text) {
            (Some(text), true) => {
                let sidecar = naming::resolve_collision(path.with_extension("txt"), self.config.collision_policy)?;
                write_new(&sidecar, text.as_bytes())?;
                Some(sidecar)
            }
            _ => None,
        };

        let artifact = PdfArtifact {
            path,
            pages: ordered.iter().map(|p| p.frame.index).collect(),
            page_count: ordered.len(),
            size_bytes: bytes.len() as u64,
            compressed,
            title,
            text,
            text_path,
            sources,
        };

        tracing::info!(
            "PDF created: {} ({} pages, {} MB)",
            artifact.path.display(),
            artifact.page_count,
            artifact.size_mb()
        );
        Ok(artifact)
    }

    fn output_path(&self, title: &str, session: Option<&str>, now: &DateTime<Local>) -> Result<PathBuf, AssemblyError> {
        let dir = naming::output_directory(&self.config, now, session);
        std::fs::create_dir_all(&dir)?;

        let mut ctx = NamingContext::from_config(&self.config, *now).with_title(Some(title));
        if let Some(session) = session {
            ctx = ctx.with_session(session);
        }

        let mut file = dir.join(naming::render(&self.config.pdf_name_template, &ctx)).into_os_string();
        file.push(".pdf");
        let path = PathBuf::from(file);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(naming::resolve_collision(path, self.config.collision_policy)?)
    }
}

fn load_rgb(path: &Path) -> Result<RgbImage, AssemblyError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| AssemblyError::ImageLoad {
            path:   path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn collect_text(pages: &[&ProcessedPage]) -> Option<String> {
    if pages.iter().all(|p| p.text.is_none()) {
        return None;
    }

    let mut out = String::new();
    for page in pages {
        out.push_str(&format!("--- Page {} ---\n", page.frame.index));
        if let Some(text) = &page.text {
            out.push_str(text);
            out.push('\n');
        }
        out.push('\n');
    }
    Some(out)
}

/// Creates `path`, refusing to overwrite
fn write_new(path: &Path, bytes: &[u8]) -> Result<(), AssemblyError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => AssemblyError::OutputExists(NamingError::Collision {
                path: path.to_path_buf(),
            }),
            _ => AssemblyError::Io(e),
        })?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn pdf_error(e: impl std::fmt::Display) -> AssemblyError {
    AssemblyError::Pdf { reason: e.to_string() }
}

fn image_stream(image: &RgbImage, embedding: Embedding) -> Result<Stream, AssemblyError> {
    let (width, height) = image.dimensions();
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    match embedding {
        Embedding::Lossless => {
            let mut stream = Stream::new(dict, image.as_raw().clone());
            stream.compress().map_err(pdf_error)?;
            Ok(stream)
        }
        Embedding::Jpeg(quality) => {
            let jpeg = encode_jpeg_rgb(image, quality).map_err(pdf_error)?;
            dict.set("Filter", "DCTDecode");
            Ok(Stream::new(dict, jpeg).with_compression(false))
        }
    }
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte order mark
/// otherwise
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = Vec::with_capacity(2 + text.len() * 2);
    bytes.extend_from_slice(&[0xFE, 0xFF]);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn pdf_date(now: &DateTime<Local>) -> String {
    let offset = now.format("%z").to_string();
    let (hours, minutes) = offset.split_at(offset.len().min(3));
    format!("D:{}{}'{}'", now.format("%Y%m%d%H%M%S"), hours, minutes)
}

fn build_document(
    images: &[RgbImage],
    title: &str,
    dpi: u32,
    embedding: Embedding,
    now: &DateTime<Local>,
) -> Result<Vec<u8>, AssemblyError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for image in images {
        let (width, height) = image.dimensions();
        let page_width = width as f32 * 72.0 / dpi as f32;
        let page_height = height as f32 * 72.0 / dpi as f32;

        let image_id = doc.add_object(image_stream(image, embedding)?);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(page_width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(page_height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().map_err(pdf_error)?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_width),
                Object::Real(page_height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => text_string(title),
        "Producer" => Object::string_literal(concat!("auto-snap-mcp ", env!("CARGO_PKG_VERSION"))),
        "CreationDate" => Object::string_literal(pdf_date(now)),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(pdf_error)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        capture::{ImageBuffer, fingerprint},
        config::CollisionPolicy,
        model::Geometry,
    };

    fn config(out: &Path) -> Config {
        Config {
            output_dir: out.to_path_buf(),
            use_date_subdirs: false,
            pdf_name_template: "{title}".to_string(),
            ..Config::default()
        }
    }

    fn frame(dir: &Path, index: u32, image: &ImageBuffer) -> CaptureFrame {
        let path = dir.join(format!("page_{index:03}.png"));
        image.inner().save(&path).unwrap();
        CaptureFrame {
            index,
            path: path.clone(),
            captured_at: Utc::now(),
            fingerprint: fingerprint::compute(image),
            region: Geometry::new(0, 0, image.width(), image.height()),
            degraded: false,
            size_bytes: std::fs::metadata(&path).unwrap().len(),
        }
    }

    fn pattern_frames(dir: &Path, count: u32) -> Vec<CaptureFrame> {
        (1..=count)
            .map(|i| frame(dir, i, &ImageBuffer::from_page_pattern(i, 300, 200)))
            .collect()
    }

    fn page_count(path: &Path) -> usize {
        Document::load(path).unwrap().get_pages().len()
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_empty_input_is_no_pages() {
        let out = tempfile::tempdir().unwrap();
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));

        let err = assembler.assemble(&[], &AssemblyRequest::default()).unwrap_err();
        assert!(matches!(err, AssemblyError::NoPages));
    }

    #[test]
    fn test_page_count_matches_input() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 4);
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));

        let artifact = assembler
            .assemble_frames(&frames, &AssemblyRequest::default())
            .unwrap();

        assert_eq!(artifact.page_count, 4);
        assert_eq!(page_count(&artifact.path), 4);
        assert_eq!(artifact.size_bytes, std::fs::metadata(&artifact.path).unwrap().len());
        assert_eq!(artifact.title, "Auto-Snap Captured Document");
    }

    #[test]
    fn test_pages_sorted_by_index() {
        let out = tempfile::tempdir().unwrap();
        let mut frames = pattern_frames(out.path(), 3);
        frames.reverse();
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));

        let artifact = assembler
            .assemble_frames(&frames, &AssemblyRequest::default())
            .unwrap();

        assert_eq!(artifact.pages, vec![1, 2, 3]);
    }

    #[test]
    fn test_page_size_follows_dpi() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 1);
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));
        let request = AssemblyRequest {
            compress: Some(false),
            ..AssemblyRequest::default()
        };

        let artifact = assembler.assemble_frames(&frames, &request).unwrap();

        let doc = Document::load(&artifact.path).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let media_box = doc
            .get_object(page_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .clone();
        // 300x200 px at 150 dpi = 144x96 pt
        assert_eq!(media_box[2].as_float().unwrap(), 144.0);
        assert_eq!(media_box[3].as_float().unwrap(), 96.0);
    }

    #[test]
    fn test_compression_never_grows_output() {
        let out = tempfile::tempdir().unwrap();
        // Flat synthetic pages compress better losslessly than as JPEG
        let frames = pattern_frames(out.path(), 2);
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));

        let lossless = assembler
            .assemble_frames(
                &frames,
                &AssemblyRequest {
                    title: Some("plain".to_string()),
                    compress: Some(false),
                    ..AssemblyRequest::default()
                },
            )
            .unwrap();
        let compressed = assembler
            .assemble_frames(
                &frames,
                &AssemblyRequest {
                    title: Some("squeezed".to_string()),
                    compress: Some(true),
                    ..AssemblyRequest::default()
                },
            )
            .unwrap();

        assert!(!lossless.compressed);
        assert!(compressed.size_bytes <= lossless.size_bytes);
        assert_eq!(page_count(&compressed.path), 2);
    }

    #[test]
    fn test_noisy_pages_prefer_jpeg() {
        let out = tempfile::tempdir().unwrap();
        let noisy = ImageBuffer::new(image::DynamicImage::ImageRgb8(RgbImage::from_fn(400, 300, |x, y| {
            let v = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729)).wrapping_mul(2_654_435_761);
            image::Rgb([(v >> 8) as u8, (v >> 16) as u8, (v >> 24) as u8])
        })));
        let frames = vec![frame(out.path(), 1, &noisy)];
        let assembler = PdfAssembler::new(Arc::new(Config {
            image_quality: 60,
            ..config(out.path())
        }));

        let artifact = assembler
            .assemble_frames(
                &frames,
                &AssemblyRequest {
                    compress: Some(true),
                    ..AssemblyRequest::default()
                },
            )
            .unwrap();

        assert!(artifact.compressed);
        assert_eq!(page_count(&artifact.path), 1);
    }

    #[test]
    fn test_collision_gets_suffix() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 1);
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));
        let request = AssemblyRequest {
            title: Some("Report".to_string()),
            ..AssemblyRequest::default()
        };

        let first = assembler.assemble_at(&[ProcessedPage::raw(frames[0].clone())], &request, fixed_now()).unwrap();
        let second = assembler.assemble_at(&[ProcessedPage::raw(frames[0].clone())], &request, fixed_now()).unwrap();

        assert_eq!(first.path, out.path().join("Report.pdf"));
        assert_eq!(second.path, out.path().join("Report_1.pdf"));
    }

    #[test]
    fn test_collision_fail_policy() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 1);
        let assembler = PdfAssembler::new(Arc::new(Config {
            collision_policy: CollisionPolicy::Fail,
            ..config(out.path())
        }));
        let request = AssemblyRequest {
            title: Some("Report".to_string()),
            ..AssemblyRequest::default()
        };

        assembler.assemble_frames(&frames, &request).unwrap();
        let err = assembler.assemble_frames(&frames, &request).unwrap_err();
        assert!(matches!(err, AssemblyError::OutputExists(_)));
    }

    #[test]
    fn test_text_sidecar() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 2);
        let pages = vec![
            ProcessedPage {
                text: Some("first page".to_string()),
                ..ProcessedPage::raw(frames[0].clone())
            },
            ProcessedPage::raw(frames[1].clone()),
        ];
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));
        let request = AssemblyRequest {
            title: Some("Notes".to_string()),
            write_text: true,
            ..AssemblyRequest::default()
        };

        let artifact = assembler.assemble(&pages, &request).unwrap();

        let sidecar = artifact.text_path.clone().unwrap();
        assert_eq!(sidecar, out.path().join("Notes.txt"));
        let text = std::fs::read_to_string(sidecar).unwrap();
        assert!(text.contains("--- Page 1 ---\nfirst page"));
        assert!(text.contains("--- Page 2 ---"));
        assert_eq!(artifact.text.as_deref(), Some(text.as_str()));
    }

    #[test]
    fn test_title_is_sanitized_in_file_name() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 1);
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));
        let request = AssemblyRequest {
            title: Some("Q3: plan/draft".to_string()),
            ..AssemblyRequest::default()
        };

        let artifact = assembler.assemble_frames(&frames, &request).unwrap();
        assert_eq!(artifact.path, out.path().join("Q3_plandraft.pdf"));

        let doc = Document::load(&artifact.path).unwrap();
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let title = doc.get_dictionary(info_id).unwrap().get(b"Title").unwrap().as_str().unwrap();
        assert_eq!(title, b"Q3: plan/draft");
    }

    #[test]
    fn test_non_ascii_title_is_utf16() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 1);
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));
        let request = AssemblyRequest {
            title: Some("Résumé 報告".to_string()),
            ..AssemblyRequest::default()
        };

        let artifact = assembler.assemble_frames(&frames, &request).unwrap();

        let doc = Document::load(&artifact.path).unwrap();
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let raw = doc.get_dictionary(info_id).unwrap().get(b"Title").unwrap().as_str().unwrap();
        assert_eq!(&raw[..2], &[0xFE, 0xFF]);
        let units: Vec<u16> = raw[2..]
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(String::from_utf16(&units).unwrap(), "Résumé 報告");
    }

    #[test]
    fn test_sources_follow_embedded_images() {
        let out = tempfile::tempdir().unwrap();
        let frames = pattern_frames(out.path(), 2);
        let enhanced = out.path().join("page_002_enhanced.png");
        std::fs::copy(&frames[1].path, &enhanced).unwrap();
        let pages = vec![
            ProcessedPage {
                enhanced_path: Some(enhanced.clone()),
                ..ProcessedPage::raw(frames[1].clone())
            },
            ProcessedPage::raw(frames[0].clone()),
        ];
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));

        let raw = assembler.assemble(&pages, &AssemblyRequest::default()).unwrap();
        assert_eq!(raw.sources, vec![frames[0].path.clone(), frames[1].path.clone()]);

        let request = AssemblyRequest {
            prefer_enhanced: true,
            ..AssemblyRequest::default()
        };
        let embedded = assembler.assemble(&pages, &request).unwrap();
        assert_eq!(embedded.sources, vec![frames[0].path.clone(), enhanced]);
    }

    #[test]
    fn test_unreadable_image() {
        let out = tempfile::tempdir().unwrap();
        let mut frames = pattern_frames(out.path(), 1);
        std::fs::write(&frames[0].path, b"not an image").unwrap();
        frames[0].size_bytes = 12;
        let assembler = PdfAssembler::new(Arc::new(config(out.path())));

        let err = assembler
            .assemble_frames(&frames, &AssemblyRequest::default())
            .unwrap_err();
        assert!(matches!(err, AssemblyError::ImageLoad { .. }));
    }
}
