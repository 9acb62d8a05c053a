//! Logseq markdown output: one topic page plus one page per concept.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use rkg_core::concept::Concept;
use rkg_core::relationship::{RelationKind, Relationship};
use rkg_graph::ResearchGraph;

const MAX_FILE_NAME_LEN: usize = 200;
const SUMMARY_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub title: String,
    /// File stem, already sanitized.
    pub file_name: String,
    pub content: String,
}

impl Page {
    fn new(title: &str, content: String) -> Self {
        Self {
            title: title.to_string(),
            file_name: sanitize_filename(title),
            content,
        }
    }

    /// Where the page lands in `dir`. `None` when the title sanitizes to nothing.
    pub fn path_in(&self, dir: &Path) -> Option<PathBuf> {
        if self.file_name.is_empty() {
            return None;
        }
        Some(dir.join(format!("{}.md", self.file_name)))
    }
}

/// Make `name` safe to use as a file stem on every platform Logseq runs on.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out.trim_matches('_').chars().take(MAX_FILE_NAME_LEN).collect()
}

/// The topic page first, then one page per concept in registry order.
///
/// The concept the topic names is described on the topic page itself; it only gets a page
/// of its own when its file name differs from the topic's. Concept pages whose file names
/// collide (compared case-insensitively) get a numeric suffix and a `title::` property so
/// Logseq still links them by name.
pub fn render(graph: &ResearchGraph) -> Vec<Page> {
    let topic_stem = sanitize_filename(graph.topic());
    let main = graph.concepts().get(graph.topic()).or_else(|| {
        graph
            .concepts()
            .iter()
            .find(|c| sanitize_filename(&c.name).eq_ignore_ascii_case(&topic_stem))
    });

    let mut pages = vec![render_topic_page(graph, main)];
    let mut used = HashSet::from([topic_stem.to_lowercase()]);

    for concept in graph.concepts().iter() {
        let mut page = render_concept_page(graph, concept);
        if page.file_name.is_empty() {
            pages.push(page);
            continue;
        }
        if used.insert(page.file_name.to_lowercase()) {
            pages.push(page);
            continue;
        }
        let is_main = main.is_some_and(|m| m.name == concept.name);
        if is_main && page.file_name.eq_ignore_ascii_case(&topic_stem) {
            continue;
        }

        let file_name = unique_file_name(&page.file_name, &mut used);
        tracing::warn!(
            concept = %concept.name,
            file_name = %file_name,
            "Concept page file name collides with another page; renamed"
        );
        page.content = format!("title:: {}\n\n{}", concept.name, page.content);
        page.file_name = file_name;
        pages.push(page);
    }
    pages
}

/// Write every page into `dir`. Two pages with the same file name are an error rather
/// than a silent overwrite.
pub fn write_pages(dir: &Path, pages: &[Page]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut seen = HashSet::new();
    let mut written = Vec::with_capacity(pages.len());
    for page in pages {
        let Some(path) = page.path_in(dir) else {
            tracing::warn!(title = %page.title, "Skipping page with empty file name");
            continue;
        };
        if !seen.insert(page.file_name.to_lowercase()) {
            anyhow::bail!(
                "pages '{}' and another page both map to {}",
                page.title,
                path.display()
            );
        }
        std::fs::write(&path, &page.content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    tracing::info!(pages = written.len(), dir = %dir.display(), "Wrote Logseq pages");
    Ok(written)
}

// ── Topic page ─────────────────────────────────────────────────────────────

fn render_topic_page(graph: &ResearchGraph, main: Option<&Concept>) -> Page {
    let mut lines = vec![
        format!("# {}", graph.topic()),
        String::new(),
        format!(
            "*Research conducted: {}*",
            graph.created_at().format("%Y-%m-%d %H:%M UTC")
        ),
        String::new(),
    ];

    if let Some(concept) = main {
        lines.push("## Overview".to_string());
        lines.push(String::new());
        lines.extend(concept_body(graph, concept, "###"));
    }

    let mut by_type: BTreeMap<&str, Vec<&Concept>> = BTreeMap::new();
    for concept in graph.concepts().iter() {
        by_type
            .entry(concept.concept_type.as_str())
            .or_default()
            .push(concept);
    }

    lines.push("## Concepts".to_string());
    lines.push(String::new());
    for (concept_type, mut concepts) in by_type {
        concepts.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| a.name.cmp(&b.name))
        });
        lines.push(format!("### {}", title_case(concept_type)));
        for concept in concepts {
            lines.push(format!(
                "- {}: {}",
                concept.to_wikilink(),
                summarize(&concept.description)
            ));
        }
        lines.push(String::new());
    }

    lines.push("## Relationships".to_string());
    lines.push(String::new());
    lines.push("### Facts".to_string());
    for fact in graph.facts() {
        let sources: Vec<String> = graph
            .sources_of(fact)
            .iter()
            .map(|c| c.to_markdown())
            .collect();
        lines.push(format!("- {} ({})", relationship_line(fact), sources.join(", ")));
    }
    lines.push(String::new());
    lines.push("### Inferences".to_string());
    for inference in graph.inferences() {
        lines.push(format!(
            "- {} (confidence {:.2})",
            relationship_line(inference),
            inference.confidence
        ));
    }
    lines.push(String::new());

    lines.push("## Sources".to_string());
    lines.push(String::new());
    let mut citations: Vec<_> = graph.citations().iter().collect();
    citations.sort_by(|a, b| a.title.cmp(&b.title));
    for citation in citations {
        lines.push(format!("- {}", citation.to_markdown()));
    }
    lines.push(String::new());

    if !graph.queries().is_empty() {
        lines.push("## Queries".to_string());
        lines.push(String::new());
        for query in graph.queries() {
            lines.push(format!("- {query}"));
        }
        lines.push(String::new());
    }

    Page::new(graph.topic(), lines.join("\n"))
}

// ── Concept pages ──────────────────────────────────────────────────────────

fn render_concept_page(graph: &ResearchGraph, concept: &Concept) -> Page {
    let mut lines = vec![format!("# {}", concept.name), String::new()];
    lines.extend(concept_body(graph, concept, "##"));
    Page::new(&concept.name, lines.join("\n"))
}

/// Everything known about one concept, with section headings at `level`.
fn concept_body(graph: &ResearchGraph, concept: &Concept, level: &str) -> Vec<String> {
    let mut lines = vec![
        format!("**Type**: {}", concept.concept_type),
        format!("**Relevance**: {:.2}", concept.relevance_score),
        String::new(),
    ];
    let section = |lines: &mut Vec<String>, heading: &str, body: Vec<String>| {
        push_section(lines, &format!("{level} {heading}"), body)
    };

    if !concept.description.is_empty() {
        section(&mut lines, "Description", vec![concept.description.clone()]);
    }
    if let Some(details) = &concept.technical_details {
        section(&mut lines, "Technical Details", vec![details.clone()]);
    }
    if let Some(notes) = &concept.implementation_notes {
        section(&mut lines, "Implementation Notes", vec![notes.clone()]);
    }
    push_list(&mut lines, level, "Key Components", concept.key_components.iter().cloned());
    push_list(&mut lines, level, "Use Cases", concept.use_cases.iter().cloned());
    push_list(&mut lines, level, "Aliases", concept.aliases.iter().cloned());

    let related = graph
        .relationships()
        .touching(&concept.name)
        .filter(|r| !r.is_self_loop())
        .map(|r| {
            let label = relation_label(r);
            if r.source.eq_ignore_ascii_case(&concept.name) {
                format!("{label} [[{}]]", r.target)
            } else {
                format!("[[{}]] {label}", r.source)
            }
        });
    push_list(&mut lines, level, "Related Concepts", related);

    let sources = graph
        .citations()
        .resolve(&concept.citations)
        .into_iter()
        .map(|c| c.to_markdown());
    push_list(&mut lines, level, "Sources", sources);

    lines
}

fn push_section(lines: &mut Vec<String>, heading: &str, body: Vec<String>) {
    lines.push(heading.to_string());
    lines.extend(body);
    lines.push(String::new());
}

fn push_list(
    lines: &mut Vec<String>,
    level: &str,
    heading: &str,
    items: impl Iterator<Item = String>,
) {
    let items: Vec<String> = items.map(|item| format!("- {item}")).collect();
    if !items.is_empty() {
        push_section(lines, &format!("{level} {heading}"), items);
    }
}

/// `stem_2`, `stem_3`, ... whichever is free first.
fn unique_file_name(stem: &str, used: &mut HashSet<String>) -> String {
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}");
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

// ── Formatting helpers ─────────────────────────────────────────────────────

fn relation_label(relationship: &Relationship) -> String {
    let label = relationship.relation_type.as_str().replace('_', " ");
    match relationship.kind {
        RelationKind::Fact => label,
        RelationKind::Inference => format!("{label} (inferred)"),
    }
}

fn relationship_line(relationship: &Relationship) -> String {
    format!(
        "[[{}]] {} [[{}]]",
        relationship.source,
        relationship.relation_type.as_str().replace('_', " "),
        relationship.target
    )
}

fn summarize(description: &str) -> String {
    if description.chars().count() > SUMMARY_LEN {
        let head: String = description.chars().take(SUMMARY_LEN).collect();
        format!("{}...", head.trim_end())
    } else {
        description.to_string()
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
