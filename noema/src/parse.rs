// Copyright 2024-2026 the noema developers.
// This file is part of noema.

// noema is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// noema is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with noema.  If not, see <http://www.gnu.org/licenses/>.

//! Surface syntax for terms.
//!
//! The syntax is LISP-like: `(head arg …)` is a compound, `?name` (or
//! `$name`) a variable, bare identifiers are symbols, decimal literals are
//! numbers and `"…"` is a quoted symbol. `(list …)` reads as a list.
//! Printing (via `Term`'s `Display`) is canonical: parse → print → parse is
//! the identity.

use crate::{
	error::{NoemaError, Result},
	term::Term,
};

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Open,
	Close,
	Atom(String),
	Quoted(String),
}

struct Lexer<'a> {
	src: &'a str,
	chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
	fn new(src: &'a str) -> Self {
		Self { src, chars: src.char_indices().peekable() }
	}

	fn next_token(&mut self) -> Result<Option<Token>> {
		loop {
			match self.chars.peek().copied() {
				None => return Ok(None),
				Some((_, c)) if c.is_whitespace() => {
					self.chars.next();
				}
				// comment to end of line
				Some((_, ';')) => {
					while let Some((_, c)) = self.chars.next() {
						if c == '\n' {
							break;
						}
					}
				}
				Some((_, '(')) => {
					self.chars.next();
					return Ok(Some(Token::Open));
				}
				Some((_, ')')) => {
					self.chars.next();
					return Ok(Some(Token::Close));
				}
				Some((_, '"')) => {
					self.chars.next();
					return self.quoted().map(Some);
				}
				Some((start, _)) => return self.atom(start).map(Some),
			}
		}
	}

	fn quoted(&mut self) -> Result<Token> {
		let mut out = String::new();
		loop {
			match self.chars.next() {
				None => return Err(NoemaError::Parse("unterminated string".into())),
				Some((_, '"')) => return Ok(Token::Quoted(out)),
				Some((_, '\\')) => match self.chars.next() {
					Some((_, 'n')) => out.push('\n'),
					Some((_, c)) => out.push(c),
					None => return Err(NoemaError::Parse("unterminated escape".into())),
				},
				Some((_, c)) => out.push(c),
			}
		}
	}

	fn atom(&mut self, start: usize) -> Result<Token> {
		let mut end = self.src.len();
		while let Some((i, c)) = self.chars.peek().copied() {
			if c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';') {
				end = i;
				break;
			}
			self.chars.next();
		}
		if self.chars.peek().is_none() {
			end = self.src.len();
		}
		Ok(Token::Atom(self.src[start..end].to_string()))
	}
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
	let mut lexer = Lexer::new(src);
	let mut out = Vec::new();
	while let Some(tok) = lexer.next_token()? {
		out.push(tok);
	}
	Ok(out)
}

fn atom_term(text: &str) -> Term {
	if let Some(name) = text.strip_prefix('?').or_else(|| text.strip_prefix('$')) {
		if !name.is_empty() {
			return Term::var(name);
		}
	}
	if let Ok(n) = text.parse::<f64>() {
		return Term::number(n);
	}
	Term::symbol(text)
}

struct Reader<'a> {
	tokens: &'a [Token],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn read(&mut self) -> Result<Term> {
		match self.tokens.get(self.pos) {
			None => Err(NoemaError::Parse("unexpected end of input".into())),
			Some(Token::Close) => Err(NoemaError::Parse("unexpected `)`".into())),
			Some(Token::Quoted(s)) => {
				self.pos += 1;
				Ok(Term::symbol(s))
			}
			Some(Token::Atom(a)) => {
				self.pos += 1;
				Ok(atom_term(a))
			}
			Some(Token::Open) => {
				self.pos += 1;
				let head = match self.tokens.get(self.pos) {
					Some(Token::Close) => {
						self.pos += 1;
						return Ok(Term::list(Vec::new()));
					}
					Some(Token::Atom(a)) => {
						let head = atom_term(a);
						if head.as_symbol().is_none() {
							return Err(NoemaError::Parse(format!("compound head must be a symbol, got `{}`", a)));
						}
						self.pos += 1;
						head
					}
					Some(tok) => return Err(NoemaError::Parse(format!("bad compound head {:?}", tok))),
					None => return Err(NoemaError::Parse("unterminated compound".into())),
				};
				let mut args = Vec::new();
				loop {
					match self.tokens.get(self.pos) {
						Some(Token::Close) => {
							self.pos += 1;
							let head = head.as_symbol().expect("checked above");
							return Ok(Term::compound(head, args));
						}
						None => return Err(NoemaError::Parse("unterminated compound".into())),
						Some(_) => args.push(self.read()?),
					}
				}
			}
		}
	}
}

/// Parse exactly one term from `src`. Trailing input is an error.
pub fn parse_term(src: &str) -> Result<Term> {
	let tokens = tokenize(src)?;
	let mut reader = Reader { tokens: &tokens, pos: 0 };
	let term = reader.read()?;
	if reader.pos != tokens.len() {
		return Err(NoemaError::Parse(format!("trailing input after term `{}`", term)));
	}
	Ok(term)
}

/// Parse each non-empty, non-comment line of `src` as one term.
pub fn parse_lines(src: &str) -> Result<Vec<Term>> {
	let mut out = Vec::new();
	for line in src.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with(';') {
			continue;
		}
		out.push(parse_term(line)?);
	}
	Ok(out)
}

/// Parse a line of surface input, wrapping anything unparsable as a quoted
/// symbol so external text always yields a term.
pub fn term_or_note(line: &str) -> Term {
	match parse_term(line) {
		Ok(t) => t,
		Err(_) => Term::symbol(line.trim()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::term::TermKind;

	fn roundtrip(src: &str) {
		let t = parse_term(src).unwrap();
		let printed = t.to_string();
		let again = parse_term(&printed).unwrap();
		assert_eq!(t, again, "{} reparsed differently", printed);
	}

	#[test]
	fn parses_atoms() {
		assert!(matches!(parse_term("foo").unwrap().kind(), TermKind::Symbol(_)));
		assert!(matches!(parse_term("?x").unwrap().kind(), TermKind::Var(_)));
		assert!(matches!(parse_term("$x").unwrap().kind(), TermKind::Var(_)));
		assert_eq!(parse_term("3.25").unwrap().as_number(), Some(3.25));
		assert_eq!(parse_term("-2").unwrap().as_number(), Some(-2.0));
		assert_eq!(parse_term("\"two words\"").unwrap().as_symbol(), Some("two words"));
	}

	#[test]
	fn parses_compounds_and_lists() {
		let t = parse_term("(add (s ?m) ?n)").unwrap();
		assert_eq!(t.head(), Some("add"));
		assert_eq!(t.args().len(), 2);

		let l = parse_term("(list 1 2 3)").unwrap();
		assert!(matches!(l.kind(), TermKind::List(_)));
		assert_eq!(l.args().len(), 3);
	}

	#[test]
	fn rejects_bad_heads() {
		assert!(parse_term("(?x a)").is_err());
		assert!(parse_term("(1 a)").is_err());
		assert!(parse_term("(p a").is_err());
		assert!(parse_term("(p a))").is_err());
	}

	#[test]
	fn print_parse_roundtrip() {
		for src in &[
			"foo",
			"?x",
			"-1.5",
			"(p a b c)",
			"(meta_def (decompose ?g) (sequence (set_status WAITING_CHILDREN) (generate_thoughts ?g)))",
			"(list (list a) \"quoted sym\" 0.125)",
			"\"don't panic\"",
			"(= (add Z ?n) ?n)",
		] {
			roundtrip(src);
		}
	}

	#[test]
	fn lines_and_notes() {
		let terms = parse_lines("; a comment\n(p a)\n\n(q b)\n").unwrap();
		assert_eq!(terms.len(), 2);

		let note = term_or_note("this is ((( not a term");
		assert_eq!(note.as_symbol(), Some("this is ((( not a term"));
	}
}
