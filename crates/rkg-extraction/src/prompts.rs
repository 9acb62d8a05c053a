use rkg_core::llm::PromptKind;

pub(crate) fn system_prompt(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::QueryGeneration => QUERY_GENERATION_SYSTEM,
        PromptKind::EntityExtraction => ENTITY_EXTRACTION_SYSTEM,
        PromptKind::RelationshipInference => RELATIONSHIP_INFERENCE_SYSTEM,
    }
}

pub(crate) fn max_tokens(kind: PromptKind) -> u32 {
    match kind {
        PromptKind::QueryGeneration => 1024,
        PromptKind::EntityExtraction | PromptKind::RelationshipInference => 4096,
    }
}

const QUERY_GENERATION_SYSTEM: &str = r#"You are a research assistant that writes web search queries.

The input is a JSON object with a research "topic", the maximum number of queries "max_queries"
and the "facets" the queries should cover.

Write distinct, specific queries that together cover the facets: definitions and overviews,
comparisons with related approaches, technical details, and recent developments.
Avoid near-duplicate queries.

Return ONLY valid JSON (no markdown fences, no commentary):

{"queries": ["query 1", "query 2"]}"#;

const ENTITY_EXTRACTION_SYSTEM: &str = r#"You are a concept and fact extraction system for a research knowledge graph.

The input is a JSON object with the research "topic", the search "query", the concept names
already known ("known_concepts") and a list of search "results", each with "title", "url"
and "snippet".

Extract the notable concepts and the facts the results state about them.

Return ONLY valid JSON (no markdown fences, no commentary) matching this schema:

{
  "concepts": [
    {
      "name": "Concept Name",
      "type": "technology | method | person | organization | field | application | metric | library | framework | project | concept | tool | language | algorithm | pattern | other",
      "description": "One or two sentences.",
      "aliases": ["optional alternate names or abbreviations"],
      "source_urls": ["urls of the results that mention this concept"],
      "relevance_score": 0.0 to 1.0,
      "technical_details": "optional: how it works",
      "implementation_notes": "optional: practical advice for building or using it",
      "key_components": ["optional, each as \"Component Name: what it does\""],
      "use_cases": ["optional"]
    }
  ],
  "facts": [
    {
      "source": "Source Concept Name",
      "relation_type": "is_a | uses | part_of | developed_by | applied_to | improves | related_to",
      "target": "Target Concept Name",
      "description": "optional: what the result says",
      "source_urls": ["urls of the results that state this fact"],
      "confidence": 0.0 to 1.0
    }
  ]
}

Rules:
- Reuse a name from known_concepts when the result talks about the same thing.
- Every fact MUST list at least one url, and every url MUST be one of the input result urls.
- Only state facts that a result explicitly supports.
- If nothing can be extracted, return {"concepts": [], "facts": []}."#;

const RELATIONSHIP_INFERENCE_SYSTEM: &str = r#"You are a reasoning system for a research knowledge graph.

The input is a JSON object with the research "topic", the extracted "concepts" (name, type,
description) and the sourced "facts" (source, relation_type, target).

Propose additional relationships between the listed concepts that follow logically from the
concepts and facts but are not already stated as facts.

Return ONLY valid JSON (no markdown fences, no commentary):

{
  "relationships": [
    {
      "source": "Source Concept Name",
      "relation_type": "is_a | uses | part_of | developed_by | applied_to | improves | related_to",
      "target": "Target Concept Name",
      "description": "Why this relationship holds.",
      "confidence": 0.0 to 1.0
    }
  ]
}

Rules:
- Use concept names exactly as listed. Do not invent concepts.
- Do not repeat existing facts.
- If nothing can be inferred, return {"relationships": []}."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_prompt() {
        for kind in [
            PromptKind::QueryGeneration,
            PromptKind::EntityExtraction,
            PromptKind::RelationshipInference,
        ] {
            assert!(system_prompt(kind).contains("Return ONLY valid JSON"));
            assert!(max_tokens(kind) >= 1024);
        }
    }
}
