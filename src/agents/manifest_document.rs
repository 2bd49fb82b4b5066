//! Structure-preserving model of an MSBuild project file.
//!
//! The document is scanned once with quick-xml to locate every
//! `Project/ItemGroup/PackageReference` item and the byte span of its version, either the
//! `Version` attribute or a nested `<Version>` element. Edits splice the new text into those
//! spans and leave every other byte untouched, so unrelated formatting, attribute order and
//! comments survive a round trip exactly.

use crate::agents::update::changeset::Change;
use crate::error::{NugradeError, Result};
use crate::nuget::PackageId;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const BOM_CHAR: char = '\u{FEFF}';

/// Prefix marking an MSBuild property substitution such as `$(SerilogVersion)`.
const PROPERTY_SIGIL: char = '$';

fn has_utf8_bom(bytes: &[u8]) -> bool {
    bytes.starts_with(UTF8_BOM)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionCarrier {
    span: Range<usize>,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PackageReference {
    include: String,
    attribute: Option<VersionCarrier>,
    element: Option<VersionCarrier>,
}

impl PackageReference {
    /// The attribute wins when both forms are present.
    fn carrier(&self) -> Option<&VersionCarrier> {
        self.attribute.as_ref().or(self.element.as_ref())
    }

    fn carrier_mut(&mut self) -> Option<&mut VersionCarrier> {
        match self.attribute {
            Some(ref mut attribute) => Some(attribute),
            None => self.element.as_mut(),
        }
    }

    fn carriers_mut(&mut self) -> impl Iterator<Item = &mut VersionCarrier> {
        self.attribute.iter_mut().chain(self.element.iter_mut())
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    text: String,
    references: Vec<PackageReference>,
}

#[derive(Debug, Clone)]
pub struct ManifestDocument {
    path: String,
    bom: bool,
    preserve_bom: bool,
    pristine: Snapshot,
    current: Snapshot,
}

impl ManifestDocument {
    /// Parse raw file bytes. Failure here is fatal for this file only.
    pub fn parse(path: impl Into<String>, raw: Vec<u8>, preserve_bom: bool) -> Result<Self> {
        let path = path.into();
        let body = raw.strip_prefix(UTF8_BOM).unwrap_or(&raw);

        let text = String::from_utf8(body.to_vec()).map_err(|e| NugradeError::ManifestParse {
            path: path.clone().into(),
            message: format!("not valid UTF-8: {e}"),
        })?;

        let references = scan_references(&text).map_err(|message| NugradeError::ManifestParse {
            path: path.clone().into(),
            message,
        })?;

        let pristine = Snapshot { text, references };

        Ok(Self {
            path,
            bom: has_utf8_bom(&raw),
            preserve_bom,
            current: pristine.clone(),
            pristine,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has_bom(&self) -> bool {
        self.bom
    }

    /// Declared package references with concrete versions. Property placeholders are left
    /// out, and the first declaration of a package wins.
    pub fn references(&self) -> BTreeMap<PackageId, String> {
        let mut references = BTreeMap::new();
        for reference in &self.current.references {
            let Some(carrier) = reference.carrier() else {
                continue;
            };
            if carrier.value.trim_start().starts_with(PROPERTY_SIGIL) {
                continue;
            }
            references
                .entry(PackageId::new(reference.include.as_str()))
                .or_insert_with(|| carrier.value.clone());
        }
        references
    }

    /// Point every declaration of `package` at `new_version`.
    ///
    /// Returns `false` when no declaration with a concrete version carrier exists.
    pub fn update(&mut self, package: &PackageId, new_version: &str) -> bool {
        let replacement = escape(new_version).into_owned();
        let mut updated = false;

        for index in 0..self.current.references.len() {
            let reference = &mut self.current.references[index];
            if !package.matches(&reference.include) {
                continue;
            }

            let Some(carrier) = reference.carrier_mut() else {
                continue;
            };
            if carrier.value.trim_start().starts_with(PROPERTY_SIGIL) {
                continue;
            }

            let span = carrier.span.clone();
            carrier.value = new_version.to_string();
            carrier.span = span.start..span.start + replacement.len();

            self.current.text.replace_range(span.clone(), &replacement);
            self.shift_spans_after(span.start, replacement.len() as isize - span.len() as isize);
            updated = true;
        }

        if !updated {
            debug!(path = %self.path, package = %package, "No version carrier to update");
        }

        updated
    }

    fn shift_spans_after(&mut self, position: usize, delta: isize) {
        if delta == 0 {
            return;
        }

        for reference in &mut self.current.references {
            for carrier in reference.carriers_mut() {
                if carrier.span.start > position {
                    carrier.span = shift(carrier.span.start, delta)..shift(carrier.span.end, delta);
                }
            }
        }
    }

    /// Discard every edit and return to the parsed original bytes.
    pub fn reset(&mut self) {
        self.current = self.pristine.clone();
    }

    /// Current contents, with the byte-order mark restored when requested and present.
    pub fn contents(&self) -> String {
        let mut contents = String::with_capacity(self.current.text.len() + 3);
        if self.preserve_bom && self.has_bom() {
            contents.push(BOM_CHAR);
        }
        contents.push_str(&self.current.text);
        contents
    }

    /// A change only when the serialization, ignoring the byte-order mark, differs from the
    /// original bytes.
    pub fn change_if_dirty(&self) -> Option<Change> {
        let contents = self.contents();
        let trimmed = contents.trim_start_matches(BOM_CHAR);
        let original = self.pristine.text.trim_start_matches(BOM_CHAR);

        if trimmed == original {
            return None;
        }

        Some(Change {
            file_path: self.path.clone(),
            contents,
        })
    }
}

fn shift(position: usize, delta: isize) -> usize {
    position.saturating_add_signed(delta)
}

fn is_named(name: &[u8], expected: &str) -> bool {
    name.eq_ignore_ascii_case(expected.as_bytes())
}

fn scan_references(text: &str) -> std::result::Result<Vec<PackageReference>, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut references = Vec::new();
    let mut open: Option<PackageReference> = None;
    let mut version_text_start: Option<usize> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed XML at byte {}: {}", reader.error_position(), e))?;
        let position = reader.buffer_position() as usize;

        match event {
            Event::Start(start) => {
                let name = start.local_name().as_ref().to_vec();
                if in_item_group(&stack) && is_named(&name, "PackageReference") {
                    open = read_reference(text, &start)?;
                } else if open.is_some() && stack.len() == 3 && is_named(&name, "Version") {
                    version_text_start = Some(position);
                }
                stack.push(name);
            }
            Event::Empty(start) => {
                let name = start.local_name();
                if in_item_group(&stack) && is_named(name.as_ref(), "PackageReference") {
                    if let Some(reference) = read_reference(text, &start)? {
                        references.push(reference);
                    }
                }
            }
            Event::End(_) => {
                stack.pop();

                if stack.len() == 3 {
                    if let (Some(start), Some(reference)) = (version_text_start.take(), open.as_mut()) {
                        let end = text[..position].rfind("</").unwrap_or(position);
                        if reference.element.is_none() && start <= end {
                            reference.element = Some(element_carrier(text, start..end));
                        }
                    }
                } else if stack.len() == 2 {
                    if let Some(reference) = open.take() {
                        references.push(reference);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(references)
}

fn in_item_group(stack: &[Vec<u8>]) -> bool {
    stack.len() == 2 && is_named(&stack[0], "Project") && is_named(&stack[1], "ItemGroup")
}

fn read_reference(
    text: &str,
    start: &BytesStart<'_>,
) -> std::result::Result<Option<PackageReference>, String> {
    let mut include = None;
    let mut attribute = None;

    for attr in start.attributes() {
        let attr = attr.map_err(|e| format!("malformed attribute: {e}"))?;
        let key = attr.key.local_name();

        if is_named(key.as_ref(), "Include") {
            include = Some(decode(&attr.value));
        } else if is_named(key.as_ref(), "Version") {
            let span = span_within(text, &attr.value)
                .ok_or_else(|| "could not locate Version attribute".to_string())?;
            attribute = Some(VersionCarrier {
                span,
                value: decode(&attr.value),
            });
        }
    }

    // `Update=` and `Remove=` items modify references declared elsewhere.
    let Some(include) = include.filter(|id| !id.trim().is_empty()) else {
        return Ok(None);
    };

    Ok(Some(PackageReference {
        include,
        attribute,
        element: None,
    }))
}

/// Span of the element text with surrounding whitespace excluded, so an edit keeps the
/// author's layout.
fn element_carrier(text: &str, inner: Range<usize>) -> VersionCarrier {
    let raw = &text[inner.clone()];
    let leading = raw.len() - raw.trim_start().len();
    let trailing = raw.len() - raw.trim_end().len();
    let span = if leading + trailing >= raw.len() {
        inner.start..inner.start
    } else {
        inner.start + leading..inner.end - trailing
    };

    VersionCarrier {
        value: decode(text[span.clone()].as_bytes()),
        span,
    }
}

fn decode(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match unescape(&text) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text.into_owned(),
    }
}

/// Byte range of `needle` inside `haystack` when it is a borrowed sub-slice of it.
fn span_within(haystack: &str, needle: &[u8]) -> Option<Range<usize>> {
    let base = haystack.as_ptr() as usize;
    let start = needle.as_ptr() as usize;
    if start < base || start + needle.len() > base + haystack.len() {
        return None;
    }
    let offset = start - base;
    Some(offset..offset + needle.len())
}
