//! Page images to PDF

use crate::error::{MaterializeError, Result};
use image::{ColorType, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

/// Compiles ordered page images into one PDF
pub trait PdfEncoder: Send + Sync {
    /// Encode `pages` in the given order, one page per image
    fn compile(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>>;
}

/// [`PdfEncoder`] built on `lopdf`
///
/// Each page's MediaBox is the image size in pixels. RGB and grayscale JPEGs are embedded
/// as-is; everything else is decoded and stored as Flate-compressed RGB.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfEncoder;

struct PageImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    data: Vec<u8>,
    jpeg: bool,
}

fn encoding_err(e: impl std::fmt::Display) -> MaterializeError {
    MaterializeError::PdfEncoding(e.to_string())
}

fn prepare(bytes: &[u8]) -> Result<PageImage> {
    let decoded = image::load_from_memory(bytes).map_err(encoding_err)?;
    let (width, height) = (decoded.width(), decoded.height());
    let is_jpeg = matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg));

    let page = match decoded.color() {
        ColorType::Rgb8 if is_jpeg => PageImage {
            width,
            height,
            color_space: "DeviceRGB",
            data: bytes.to_vec(),
            jpeg: true,
        },
        ColorType::L8 if is_jpeg => PageImage {
            width,
            height,
            color_space: "DeviceGray",
            data: bytes.to_vec(),
            jpeg: true,
        },
        _ => PageImage {
            width,
            height,
            color_space: "DeviceRGB",
            data: decoded.to_rgb8().into_raw(),
            jpeg: false,
        },
    };
    Ok(page)
}

fn image_stream(page: PageImage) -> Stream {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(i64::from(page.width)),
        "Height" => Object::Integer(i64::from(page.height)),
        "ColorSpace" => page.color_space,
        "BitsPerComponent" => Object::Integer(8),
    };
    if page.jpeg {
        dict.set("Filter", "DCTDecode");
        Stream::new(dict, page.data).with_compression(false)
    } else {
        let mut stream = Stream::new(dict, page.data);
        if let Err(e) = stream.compress() {
            tracing::debug!(error = %e, "page stream left uncompressed");
        }
        stream
    }
}

fn add_page(doc: &mut Document, pages_id: ObjectId, bytes: &[u8]) -> Result<ObjectId> {
    let image = prepare(bytes)?;
    let (w, h) = (i64::from(image.width), i64::from(image.height));
    let image_id = doc.add_object(image_stream(image));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(w),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(h),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().map_err(encoding_err)?,
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(w),
            Object::Integer(h),
        ],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    }))
}

impl PdfEncoder for LopdfEncoder {
    fn compile(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>> {
        if pages.is_empty() {
            return Err(encoding_err("no pages to encode").into());
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::with_capacity(pages.len());
        for bytes in pages {
            kids.push(Object::Reference(add_page(&mut doc, pages_id, bytes)?));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }
}
