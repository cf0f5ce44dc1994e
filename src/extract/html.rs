//! Static-HTML extractor
//!
//! Reads listing rows, post bodies, attachments and comments from server-rendered
//! markup with CSS selectors. The default selectors match the board layout the
//! crawler was written against; other boards can supply their own
//! [`SiteSelectors`].

use crate::extract::{
    CommentPage, CommentStub, Document, Extractor, ImageRef, PostDetail, PostStub,
};
use crate::ExtractError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Extensions accepted for attachment links
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// CSS selectors describing one site's markup
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub listing_table: String,
    pub listing_row: String,
    pub number: String,
    pub title_link: String,
    pub writer: String,
    pub date: String,
    pub views: String,
    pub votes: String,
    pub body: String,
    pub inline_image: String,
    pub attachment_link: String,
    pub comment_item: String,
    pub comment_author: String,
    pub comment_content: String,
    pub comment_date: String,
    pub comment_next: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            listing_table: "table.gall_list".to_string(),
            listing_row: "tr.ub-content".to_string(),
            number: ".gall_num".to_string(),
            title_link: ".gall_tit a".to_string(),
            writer: ".gall_writer".to_string(),
            date: ".gall_date".to_string(),
            views: ".gall_count".to_string(),
            votes: ".gall_recommend".to_string(),
            body: "div.writing_view_box".to_string(),
            inline_image: "img".to_string(),
            attachment_link: "div.appending_file_box li a".to_string(),
            comment_item: ".comment_wrap .comment_list .ub-content".to_string(),
            comment_author: ".nick".to_string(),
            comment_content: ".comment".to_string(),
            comment_date: ".date_time".to_string(),
            comment_next: ".comment_wrap .pagination a.page_next".to_string(),
        }
    }
}

/// Extractor for server-rendered gallery pages
#[derive(Debug, Clone, Default)]
pub struct HtmlExtractor {
    selectors: SiteSelectors,
}

impl HtmlExtractor {
    pub fn new(selectors: SiteSelectors) -> Self {
        Self { selectors }
    }

    /// Parses one listing row; `None` means the row is not a post (notice, ad, bad number)
    fn parse_row(
        &self,
        row: ElementRef<'_>,
        base: &Url,
        compiled: &ListingSelectors,
    ) -> Option<PostStub> {
        let raw_number = first_text(row, &compiled.number).unwrap_or_default();
        let number = match raw_number.parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::debug!("Skipping listing row with number '{}'", raw_number);
                return None;
            }
        };

        let title_link = row.select(&compiled.title_link).next();
        let title = title_link.map(element_text).unwrap_or_default();
        let detail_url = title_link
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| resolve_link(href, base));

        let writer = row.select(&compiled.writer).next();
        let author = writer
            .and_then(|w| w.value().attr("data-nick").map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| writer.map(element_text))
            .unwrap_or_default();
        let author_id = writer
            .and_then(|w| w.value().attr("data-uid"))
            .unwrap_or_default()
            .to_string();
        let author_ip = writer
            .and_then(|w| w.value().attr("data-ip"))
            .unwrap_or_default()
            .to_string();

        // The full timestamp lives in the title attribute; the cell text is abbreviated
        let date_cell = row.select(&compiled.date).next();
        let date = date_cell
            .and_then(|d| d.value().attr("title").map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| date_cell.map(element_text))
            .unwrap_or_default();

        let views = first_text(row, &compiled.views)
            .map(|s| parse_counter(&s))
            .unwrap_or(0);
        let votes = first_text(row, &compiled.votes)
            .map(|s| parse_counter(&s))
            .unwrap_or(0);

        Some(PostStub {
            number,
            title,
            author,
            author_id,
            author_ip,
            date,
            views,
            votes,
            detail_url,
        })
    }

    fn comment_page(&self, document: &Html, base: &Url) -> Result<CommentPage, ExtractError> {
        let item = compile(&self.selectors.comment_item)?;
        let author = compile(&self.selectors.comment_author)?;
        let content = compile(&self.selectors.comment_content)?;
        let date = compile(&self.selectors.comment_date)?;
        let next = compile(&self.selectors.comment_next)?;

        let mut comments = Vec::new();
        for element in document.select(&item) {
            let comment = CommentStub {
                author: first_text(element, &author).unwrap_or_default(),
                content: first_text(element, &content).unwrap_or_default(),
                date: first_text(element, &date).unwrap_or_default(),
            };

            if comment.author.is_empty() && comment.content.is_empty() {
                tracing::debug!("Skipping empty comment element");
                continue;
            }
            comments.push(comment);
        }

        let next_page = document
            .select(&next)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| resolve_link(href, base));

        Ok(CommentPage {
            comments,
            next_page,
        })
    }
}

struct ListingSelectors {
    number: Selector,
    title_link: Selector,
    writer: Selector,
    date: Selector,
    views: Selector,
    votes: Selector,
}

impl Extractor for HtmlExtractor {
    fn parse_listing(
        &self,
        doc: &Document,
        min_post_id: u64,
    ) -> Result<Vec<PostStub>, ExtractError> {
        let document = Html::parse_document(&doc.body);

        let table = compile(&self.selectors.listing_table)?;
        let row = compile(&self.selectors.listing_row)?;
        let compiled = ListingSelectors {
            number: compile(&self.selectors.number)?,
            title_link: compile(&self.selectors.title_link)?,
            writer: compile(&self.selectors.writer)?,
            date: compile(&self.selectors.date)?,
            views: compile(&self.selectors.views)?,
            votes: compile(&self.selectors.votes)?,
        };

        let rows: Vec<ElementRef<'_>> = document.select(&row).collect();
        if rows.is_empty() && document.select(&table).next().is_none() {
            return Err(ExtractError::MissingElement {
                selector: self.selectors.listing_table.clone(),
            });
        }

        let mut stubs = Vec::with_capacity(rows.len());
        for element in rows {
            let Some(stub) = self.parse_row(element, &doc.url, &compiled) else {
                continue;
            };

            if stub.number < min_post_id {
                tracing::debug!(
                    "Post {} is below the floor {}, skipping",
                    stub.number,
                    min_post_id
                );
                continue;
            }
            stubs.push(stub);
        }

        Ok(stubs)
    }

    fn parse_detail(&self, doc: &Document) -> Result<PostDetail, ExtractError> {
        let document = Html::parse_document(&doc.body);

        let body = compile(&self.selectors.body)?;
        let inline_image = compile(&self.selectors.inline_image)?;
        let attachment = compile(&self.selectors.attachment_link)?;

        let mut body_text = String::new();
        let mut image_refs: Vec<ImageRef> = Vec::new();

        // Deleted or restricted posts lack the body; keep the row with an empty body
        match document.select(&body).next() {
            Some(content) => {
                body_text = content
                    .text()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");

                let mut push_image = |image: ImageRef| {
                    if !image_refs.iter().any(|known| known.url == image.url) {
                        image_refs.push(image);
                    }
                };

                for img in content.select(&inline_image) {
                    let Some(url) = img
                        .value()
                        .attr("src")
                        .and_then(|src| resolve_link(src, &doc.url))
                    else {
                        continue;
                    };
                    let suggested_filename = last_segment(&url);
                    push_image(ImageRef {
                        url,
                        suggested_filename,
                    });
                }

                for link in document.select(&attachment) {
                    let Some(url) = link
                        .value()
                        .attr("href")
                        .and_then(|href| resolve_link(href, &doc.url))
                    else {
                        continue;
                    };
                    let label = element_text(link);
                    if !is_image_name(url.path()) && !is_image_name(&label) {
                        continue;
                    }
                    let suggested_filename = if label.is_empty() {
                        last_segment(&url)
                    } else {
                        label
                    };
                    push_image(ImageRef {
                        url,
                        suggested_filename,
                    });
                }
            }
            None => {
                tracing::warn!(
                    "No element matching '{}' on {}, storing post without body",
                    self.selectors.body,
                    doc.url
                );
            }
        }

        let comments = self.comment_page(&document, &doc.url)?;

        Ok(PostDetail {
            body_text,
            image_refs,
            comment_stubs: comments.comments,
            next_comment_page: comments.next_page,
        })
    }

    fn parse_comments(&self, doc: &Document) -> Result<CommentPage, ExtractError> {
        let document = Html::parse_document(&doc.body);
        self.comment_page(&document, &doc.url)
    }
}

fn compile(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css)
        .map_err(|e| ExtractError::InvalidDocument(format!("invalid selector '{}': {:?}", css, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(element_text)
}

/// Reads a counter cell, ignoring separators; anything unreadable counts as zero
fn parse_counter(text: &str) -> i64 {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn is_image_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn last_segment(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default()
        .to_string()
}

/// Resolves an href against the page URL
///
/// Returns None for script, mail, phone and data links, fragments, and
/// anything that does not resolve to http(s).
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    match base.join(href) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        _ => None,
    }
}
