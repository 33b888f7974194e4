use logos::Logos;

/// JSON 文本的词法单元
///
/// 除标准 JSON 外还接受单引号字符串、shell 构造函数名与正则字面量。
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub(crate) enum JsonToken {
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    /// 保留原文, 由解析器决定 Int32、Int64 或 Double
    #[regex(r"-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    Number(String),

    #[token("-Infinity")]
    NegativeInfinity,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"/([^/\\\n]|\\.)+/[a-z]*", |lex| lex.slice().to_string())]
    Regex(String),
}

impl std::fmt::Display for JsonToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonToken::String(s) => write!(f, "\"{}\"", s),
            JsonToken::Number(n) => f.write_str(n),
            JsonToken::Identifier(s) => f.write_str(s),
            JsonToken::Regex(s) => f.write_str(s),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// 切分输入; 无法识别的字符返回其偏移
pub(crate) fn tokenize(input: &str) -> Result<Vec<(JsonToken, std::ops::Range<usize>)>, usize> {
    let mut tokens = Vec::new();
    for (result, span) in JsonToken::lexer(input).spanned() {
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => return Err(span.start),
        }
    }
    Ok(tokens)
}

/// 去掉引号并处理转义序列, 非法转义返回 None
fn unescape(quoted: &str) -> Option<String> {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => {
                let high = read_hex4(&mut chars)?;
                if (0xD800..0xDC00).contains(&high) {
                    if chars.next()? != '\\' || chars.next()? != 'u' {
                        return None;
                    }
                    let low = read_hex4(&mut chars)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return None;
                    }
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    out.push(char::from_u32(code)?);
                } else {
                    out.push(char::from_u32(high)?);
                }
            }
            _ => return None,
        }
    }
    Some(out)
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        value = value * 16 + chars.next()?.to_digit(16)?;
    }
    Some(value)
}
