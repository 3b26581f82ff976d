//! Attachment Merger: appends PDF attachments, and optionally image
//! attachments, as extra pages after the rendered message.
//!
//! Each attachment is loaded and prepared in isolation before anything is
//! copied into the output, so a failure at any point leaves the output
//! exactly as it was. `lopdf` can panic on hostile input; that is caught
//! per attachment as well.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info, warn};

use crate::config::{MergeConfig, RenderConfig};
use crate::error::{ConvertError, Result};
use crate::model::Attachment;
use crate::render::layout::PageGeometry;
use crate::render::{image, pdf};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Page-tree nesting beyond this is treated as a cycle.
const MAX_TREE_DEPTH: usize = 64;

/// Pages of one attachment, renumbered to slot in after the output's
/// existing objects.
struct PreparedPages {
    pages: Vec<ObjectId>,
    objects: BTreeMap<ObjectId, Object>,
    max_id: u32,
}

#[derive(Debug, Clone)]
pub struct Merger {
    geometry: PageGeometry,
    append_images: bool,
}

impl Merger {
    pub fn new(geometry: PageGeometry, append_images: bool) -> Self {
        Self {
            geometry,
            append_images,
        }
    }

    pub fn from_config(merge: &MergeConfig, render: &RenderConfig) -> Self {
        Self::new(PageGeometry::from_config(render), merge.append_images)
    }

    /// Append eligible attachments to `rendered`, in record order.
    ///
    /// Returns `rendered` unchanged when `enabled` is false or nothing could
    /// be appended. Only a failure to reopen `rendered` itself is an error.
    pub fn merge(
        &self,
        rendered: &[u8],
        attachments: &[Attachment],
        consumed: &BTreeSet<String>,
        enabled: bool,
    ) -> Result<Vec<u8>> {
        if !enabled {
            return Ok(rendered.to_vec());
        }
        let eligible: Vec<&Attachment> = attachments
            .iter()
            .filter(|a| self.is_eligible(a, consumed))
            .collect();
        if eligible.is_empty() {
            debug!("No attachments to merge");
            return Ok(rendered.to_vec());
        }

        let mut output = Document::load_mem(rendered)?;
        let mut appended = 0usize;
        for attachment in eligible {
            let start_id = output.max_id + 1;
            let prepared = catch_unwind(AssertUnwindSafe(|| self.prepare(attachment, start_id)))
                .unwrap_or_else(|_| Err(ConvertError::render("PDF library panicked")));
            match prepared.and_then(|p| append(&mut output, p)) {
                Ok(pages) => {
                    appended += 1;
                    debug!(filename = %attachment.filename, pages, "Merged attachment");
                }
                Err(e) => {
                    let error = ConvertError::AttachmentMerge {
                        filename: attachment.filename.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %error, "Skipping attachment");
                }
            }
        }

        if appended == 0 {
            return Ok(rendered.to_vec());
        }
        info!(appended, "Attachments merged");
        let mut bytes = Vec::new();
        output
            .save_to(&mut bytes)
            .map_err(|e| ConvertError::render(format!("writing merged PDF: {e}")))?;
        Ok(bytes)
    }

    fn is_eligible(&self, attachment: &Attachment, consumed: &BTreeSet<String>) -> bool {
        if attachment.is_pdf() {
            return true;
        }
        self.append_images
            && attachment.is_image()
            && !attachment
                .content_id
                .as_ref()
                .is_some_and(|id| consumed.contains(id))
    }

    fn prepare(&self, attachment: &Attachment, start_id: u32) -> Result<PreparedPages> {
        if attachment.is_pdf() {
            return prepare_pdf(&attachment.bytes, start_id);
        }
        let decoded = image::decode(&attachment.bytes)?;
        let page = pdf::image_page(&decoded, &self.geometry, &attachment.filename)?;
        prepare_pdf(&page, start_id)
    }
}

fn prepare_pdf(bytes: &[u8], start_id: u32) -> Result<PreparedPages> {
    let mut doc = Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        return Err(ConvertError::render("document is encrypted"));
    }
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(ConvertError::render("document has no pages"));
    }
    for &page_id in &page_ids {
        materialize_inherited(&mut doc, page_id)?;
    }

    doc.renumber_objects_with(start_id);
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let max_id = doc.max_id;

    // The attachment's own catalog and page tree nodes are replaced by the
    // output's
    let objects = doc
        .objects
        .into_iter()
        .filter(|(_, object)| {
            !matches!(
                object.as_dict().and_then(|d| d.get(b"Type")).and_then(Object::as_name),
                Ok(b"Catalog" | b"Pages")
            )
        })
        .collect();

    Ok(PreparedPages {
        pages,
        objects,
        max_id,
    })
}

/// Copy inherited attributes onto the page itself, so it keeps them once
/// detached from its original tree.
fn materialize_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let mut inherited = Vec::new();
    let page = doc.get_dictionary(page_id)?;
    let mut missing: Vec<&[u8]> = INHERITABLE.iter().copied().filter(|k| !page.has(k)).collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    let mut depth = 0;
    while let Some(node_id) = parent {
        if missing.is_empty() || depth == MAX_TREE_DEPTH {
            break;
        }
        let node = doc.get_dictionary(node_id)?;
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    for (key, value) in inherited {
        page.set(key, value);
    }
    Ok(())
}

/// Move prepared objects into `output` and hang the pages under its root
/// page tree node. Returns the number of pages added.
fn append(output: &mut Document, prepared: PreparedPages) -> Result<usize> {
    let root_pages = output
        .catalog()?
        .get(b"Pages")
        .and_then(Object::as_reference)?;
    // Checked before anything is moved
    output.get_dictionary(root_pages)?;

    let PreparedPages {
        pages,
        mut objects,
        max_id,
    } = prepared;
    for page_id in &pages {
        if let Some(page) = objects.get_mut(page_id).and_then(|o| o.as_dict_mut().ok()) {
            page.set("Parent", root_pages);
        }
    }
    output.objects.append(&mut objects);
    output.max_id = output.max_id.max(max_id);

    let root = output.get_object_mut(root_pages)?.as_dict_mut()?;
    let mut kids = root
        .get(b"Kids")
        .and_then(Object::as_array)
        .cloned()
        .unwrap_or_default();
    kids.extend(pages.iter().map(|&id| Object::Reference(id)));
    let count = root.get(b"Count").and_then(Object::as_i64).unwrap_or(0) + pages.len() as i64;
    root.set("Kids", kids);
    root.set("Count", count);
    Ok(pages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::layout::Page;
    use std::io::Cursor;

    fn blank_pdf(pages: usize) -> Vec<u8> {
        let geometry = PageGeometry::from_config(&RenderConfig::default());
        pdf::write(&vec![Page::default(); pages], &[], None, &geometry, "blank")
            .expect("write")
            .bytes
    }

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).expect("load").get_pages().len()
    }

    fn png() -> Vec<u8> {
        let img = ::image::RgbImage::from_pixel(8, 8, ::image::Rgb([9, 9, 9]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ::image::ImageFormat::Png).expect("encode");
        out.into_inner()
    }

    fn merger() -> Merger {
        Merger::from_config(&MergeConfig::default(), &RenderConfig::default())
    }

    #[test]
    fn test_disabled_returns_input() {
        let base = blank_pdf(1);
        let atts = vec![Attachment::new("a.pdf", "application/pdf", None, false, blank_pdf(2))];
        let out = merger().merge(&base, &atts, &BTreeSet::new(), false).expect("merge");
        assert_eq!(out, base);
    }

    #[test]
    fn test_pdf_pages_appended_in_order() {
        let base = blank_pdf(1);
        let atts = vec![
            Attachment::new("two.pdf", "application/pdf", None, false, blank_pdf(2)),
            Attachment::new("notes.txt", "text/plain", None, false, b"hi".to_vec()),
            Attachment::new("THREE.PDF", "application/octet-stream", None, false, blank_pdf(3)),
        ];
        let out = merger().merge(&base, &atts, &BTreeSet::new(), true).expect("merge");
        assert_eq!(page_count(&out), 6);
    }

    #[test]
    fn test_corrupt_pdf_skipped() {
        let base = blank_pdf(1);
        let atts = vec![
            Attachment::new("broken.pdf", "application/pdf", None, false, b"%PDF-1.4 garbage".to_vec()),
            Attachment::new("ok.pdf", "application/pdf", None, false, blank_pdf(2)),
        ];
        let out = merger().merge(&base, &atts, &BTreeSet::new(), true).expect("merge");
        assert_eq!(page_count(&out), 3);
    }

    #[test]
    fn test_only_corrupt_attachments_returns_input() {
        let base = blank_pdf(1);
        let atts = vec![Attachment::new("x.pdf", "application/pdf", None, false, b"nope".to_vec())];
        let out = merger().merge(&base, &atts, &BTreeSet::new(), true).expect("merge");
        assert_eq!(out, base);
    }

    #[test]
    fn test_images_appended_unless_consumed() {
        let base = blank_pdf(1);
        let atts = vec![
            Attachment::new("inline.png", "image/png", Some("logo"), true, png()),
            Attachment::new("photo.png", "image/png", None, false, png()),
        ];
        let consumed = BTreeSet::from(["logo".to_string()]);
        let out = merger().merge(&base, &atts, &consumed, true).expect("merge");
        assert_eq!(page_count(&out), 2);

        let no_images = Merger::new(PageGeometry::from_config(&RenderConfig::default()), false);
        let out = no_images.merge(&base, &atts, &consumed, true).expect("merge");
        assert_eq!(out, base);
    }

    #[test]
    fn test_inherited_media_box_materialized() {
        let attachment = blank_pdf(1);
        let mut doc = Document::load_mem(&attachment).expect("load");
        let page_id = *doc.get_pages().values().next().expect("page");
        let media_box = doc
            .get_dictionary(page_id)
            .and_then(|d| d.get(b"MediaBox"))
            .cloned()
            .expect("media box");
        // Move the MediaBox up to the page tree root
        let root = doc.catalog().and_then(|c| c.get(b"Pages")).and_then(Object::as_reference).expect("root");
        doc.get_object_mut(page_id).and_then(Object::as_dict_mut).expect("page").remove(b"MediaBox");
        doc.get_object_mut(root).and_then(Object::as_dict_mut).expect("root").set("MediaBox", media_box);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");
        let prepared = prepare_pdf(&bytes, 100).expect("prepare");
        let page = prepared.objects[&prepared.pages[0]].as_dict().expect("dict");
        assert!(page.has(b"MediaBox"));
        assert!(prepared.pages[0].0 >= 100);
    }

    #[test]
    fn test_undecodable_image_skipped() {
        let base = blank_pdf(1);
        let atts = vec![Attachment::new("x.png", "image/png", None, false, b"junk".to_vec())];
        let out = merger().merge(&base, &atts, &BTreeSet::new(), true).expect("merge");
        assert_eq!(out, base);
    }
}
