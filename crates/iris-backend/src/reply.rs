use serde_json::Value;

/// Prompt used when the request carries none.
pub const NO_PROMPT: &str = "No prompt provided";

const REPLY_TEMPLATE: &str = r#"# 💬 IrisArc Markdown Stream Demo

**You said:** {prompt}

---

Here’s a *sample streaming* **Markdown** reply with various elements:

1. **Bold text** for emphasis
2. *Italic text* for subtle tone
3. [A sample link](https://example.com)
4. Inline code: `print("hello world")`

---

### 🧠 Example Code Block
```python
def greet(name):
    print("Hello, " + name + "!")

greet("IrisArc")
```
---

> “This quote shows how markdown can structure responses beautifully.”

- [x] Works with streaming
- [ ] Not rendered yet (until you add react-markdown)

*— end of stream —*
"#;

/// Pull the prompt out of a raw request body.
///
/// Malformed JSON, a missing or non-string `prompt`, and a blank prompt all
/// fall back to [`NO_PROMPT`].
pub fn prompt_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.get("prompt"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(NO_PROMPT)
        .to_string()
}

/// The full markdown reply, with every newline turned into a hard break.
pub fn render_reply(prompt: &str) -> String {
    REPLY_TEMPLATE
        .replacen("{prompt}", prompt, 1)
        .replace('\n', "  \n")
}

/// Split on single spaces; each token keeps a trailing space so the
/// concatenation is the reply plus one space.
pub fn reply_tokens(reply: &str) -> Vec<String> {
    reply.split(' ').map(|t| format!("{t} ")).collect()
}
