//! CLI front-ends to the pipeline: `search`, `ask` and `chat`.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use essay_rag_core::{Answer, ChatMessage, RagPipeline, Source};

use crate::app::AppContext;
use crate::config::Config;

const EXCERPT_CHARS: usize = 200;

/// `essay-rag search`: retrieval only, no generation.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let ctx = AppContext::from_config(config).await?;
    let k = k.unwrap_or(config.retrieval.k);
    let result = ctx.pipeline.retriever().retrieve(query, k).await?;

    if result.documents.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, scored) in result.documents.iter().enumerate() {
        let meta = &scored.document.metadata;
        let title = if meta.title.is_empty() {
            "(untitled)"
        } else {
            meta.title.as_str()
        };
        println!("{}. [{:.3}] {}", i + 1, scored.score, title);
        if !meta.source_url.is_empty() {
            println!("    url: {}", meta.source_url);
        }
        println!("    excerpt: \"{}\"", excerpt(&scored.document.content, EXCERPT_CHARS));
        println!();
    }
    Ok(())
}

/// `essay-rag ask`: answer one question, optionally continuing a saved
/// conversation.
pub async fn run_ask(
    config: &Config,
    question: &str,
    history: Option<&Path>,
    stream: bool,
) -> Result<()> {
    let history = match history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };
    let ctx = AppContext::from_config(config).await?;
    answer_and_print(&ctx.pipeline, &history, question, stream).await?;
    Ok(())
}

/// `essay-rag chat`: interactive session. History lives in memory only.
pub async fn run_chat(config: &Config) -> Result<()> {
    let ctx = AppContext::from_config(config).await?;
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Ask about the essays. /reset clears the conversation, /exit quits.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                history.clear();
                println!("(conversation cleared)");
                continue;
            }
            _ => {}
        }

        match answer_and_print(&ctx.pipeline, &history, input, true).await {
            Ok(answer) => {
                history.push(ChatMessage::user(input));
                history.push(answer.into_message());
            }
            // The session survives provider failures; the turn is dropped.
            Err(e) => eprintln!("error: {:#}", e),
        }
    }
    Ok(())
}

async fn answer_and_print(
    pipeline: &RagPipeline,
    history: &[ChatMessage],
    question: &str,
    stream: bool,
) -> Result<Answer> {
    let answer = if stream {
        let mut answer = pipeline.answer_stream(history, question).await?;
        let mut content = String::new();
        let mut stdout = std::io::stdout();
        while let Some(chunk) = answer.tokens.next().await {
            let chunk = chunk.context("answer stream failed")?;
            print!("{}", chunk);
            stdout.flush()?;
            content.push_str(&chunk);
        }
        println!();
        Answer {
            content,
            sources: answer.sources,
        }
    } else {
        let answer = pipeline.answer(history, question).await?;
        println!("{}", answer.content);
        answer
    };

    print!("{}", format_sources(&answer.sources));
    Ok(answer)
}

/// Read a conversation saved as a JSON array of chat messages.
pub fn load_history(path: &Path) -> Result<Vec<ChatMessage>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid history file: {}", path.display()))
}

fn format_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nSources:\n");
    for source in sources {
        out.push_str(&format!("  - {} <{}>\n", source.title, source.url));
    }
    out
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use essay_rag_core::Role;

    #[test]
    fn test_load_history() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        std::fs::write(
            &path,
            r#"[
                {"role": "user", "content": "What is a startup?"},
                {"role": "system", "content": "A company designed to grow fast.",
                 "sources": [{"title": "Startup = Growth", "url": "http://paulgraham.com/growth.html"}]}
            ]"#,
        )
        .unwrap();
        let history = load_history(&path).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::System);
        assert_eq!(history[1].sources.as_ref().unwrap()[0].title, "Startup = Growth");

        std::fs::write(&path, "not json").unwrap();
        assert!(load_history(&path).is_err());
    }

    #[test]
    fn test_format_sources() {
        assert_eq!(format_sources(&[]), "");
        let out = format_sources(&[Source {
            title: "Cities and Ambition".into(),
            url: "http://paulgraham.com/cities.html".into(),
        }]);
        assert!(out.contains("  - Cities and Ambition <http://paulgraham.com/cities.html>"));
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("a\n\nb   c", 10), "a b c");
        assert_eq!(excerpt("abcdefghij klm", 10), "abcdefghij…");
    }
}
