//! Recursive-descent parser (spec §4.2): token sequence -> AST. Operator
//! precedence ladder, low to high: ternary, or, and, in/not in, comparison,
//! concatenation, additive, multiplicative, power, unary, test, filter,
//! call/subscript/member, atom.

use ahash::AHashMap;

use crate::ast::{Ast, Kind, NodeId, NodeIdAllocator, Operator};
use crate::error::{Kind as ErrKind, ParseError};
use crate::location::Location;
use crate::program::TrimFlags;
use crate::token::{Keyword, Literal, Operator as Op, Token, TokenKind};

/// `{{-`/`-}}` trim markers, keyed by the id of the node that sits inside
/// the expansion they border. Command tags (`{%-`/`-%}`) are parsed and
/// their markers are recorded on the token (spec §4.1) but not threaded
/// through here — see DESIGN.md's "Whitespace trim scope" note.
pub type TrimMap = AHashMap<NodeId, TrimFlags>;

pub fn parse(tokens: Vec<Token>) -> Result<(Ast, NodeIdAllocator, TrimMap), ParseError> {
    let mut parser = Parser { tokens, pos: 0, ids: NodeIdAllocator::default(), trim: AHashMap::default() };
    let root = parser.parse_template()?;
    if !parser.eof() {
        return Err(parser.err(ErrKind::SyntaxError, "trailing tokens after template"));
    }
    Ok((root, parser.ids, parser.trim))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ids: NodeIdAllocator,
    trim: TrimMap,
}

impl Parser {
    fn eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn cur(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn cur_loc(&self) -> Location {
        self.cur().map(|t| t.loc).unwrap_or_default()
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, kind: ErrKind, message: impl Into<String>) -> ParseError {
        ParseError { kind, message: message.into(), location: self.cur_loc() }
    }

    fn node(&mut self, loc: Location, kind: Kind) -> Ast {
        Ast::new(self.ids.alloc(), loc, kind)
    }

    fn is_operator(&self, op: Op) -> bool {
        matches!(self.cur(), Some(Token { kind: TokenKind::Operator(o), .. }) if *o == op)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self.cur(), Some(Token { kind: TokenKind::Keyword(k), .. }) if *k == kw)
    }

    fn is_symbol(&self, name: &str) -> bool {
        matches!(self.cur(), Some(Token { kind: TokenKind::Symbol(s), .. }) if s == name)
    }

    fn expect_operator(&mut self, op: Op, what: &str) -> Result<(), ParseError> {
        if self.is_operator(op) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(ErrKind::SyntaxError, format!("expected {what}")))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword, what: &str) -> Result<(), ParseError> {
        if self.is_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(ErrKind::SyntaxError, format!("expected {what}")))
        }
    }

    fn expect_symbol(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Symbol(s), .. }) => Ok(s),
            _ => Err(self.err(ErrKind::SyntaxError, "expected identifier")),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Literal(Literal::Str(s)), .. }) => Ok(s),
            _ => Err(self.err(ErrKind::SyntaxError, "expected string literal")),
        }
    }

    fn next_command_keyword(&self) -> Option<Keyword> {
        if let Some(Token { kind: TokenKind::CommandBegin, .. }) = self.cur() {
            if let Some(Token { kind: TokenKind::Keyword(k), .. }) = self.tokens.get(self.pos + 1) {
                return Some(*k);
            }
        }
        None
    }

    // ---- top level -------------------------------------------------

    fn parse_template(&mut self) -> Result<Ast, ParseError> {
        self.parse_items_until(&[])
    }

    fn parse_items_until(&mut self, stop: &[Keyword]) -> Result<Ast, ParseError> {
        let loc = self.cur_loc();
        let mut items = Vec::new();
        while !self.eof() {
            if let Some(kw) = self.next_command_keyword() {
                if stop.contains(&kw) {
                    break;
                }
            }
            items.push(self.parse_top_level_item()?);
        }
        Ok(self.node(loc, Kind::Multiple(items)))
    }

    fn parse_top_level_item(&mut self) -> Result<Ast, ParseError> {
        let loc = self.cur_loc();
        match self.cur().map(|t| &t.kind) {
            Some(TokenKind::Text(_)) => {
                let Some(Token { kind: TokenKind::Text(s), .. }) = self.advance() else { unreachable!() };
                Ok(self.node(loc, Kind::Text(s)))
            }
            Some(TokenKind::ExpansionBegin) => {
                let begin = self.advance().unwrap();
                let value = self.parse_ternary()?;
                if !matches!(self.cur().map(|t| &t.kind), Some(TokenKind::ExpansionEnd)) {
                    return Err(self.err(ErrKind::SyntaxError, "expected '}}'"));
                }
                let end = self.advance().unwrap();
                let mut flags = TrimFlags::NONE;
                if begin.trim.left {
                    flags = flags.union(TrimFlags::LEFT);
                }
                if end.trim.right {
                    flags = flags.union(TrimFlags::RIGHT);
                }
                if !flags.is_none() {
                    self.trim.insert(value.id, flags);
                }
                Ok(value)
            }
            Some(TokenKind::CommandBegin) => self.parse_command(),
            _ => Err(self.err(ErrKind::SyntaxError, "unexpected token")),
        }
    }

    fn parse_command(&mut self) -> Result<Ast, ParseError> {
        self.advance(); // CommandBegin
        let loc = self.cur_loc();
        let keyword = match self.cur().map(|t| &t.kind) {
            Some(TokenKind::Keyword(k)) => *k,
            _ => return Err(self.err(ErrKind::SyntaxError, "expected command keyword")),
        };
        self.advance();

        let result = match keyword {
            Keyword::Set => self.parse_set(loc),
            Keyword::If => self.parse_if(loc),
            Keyword::For => self.parse_for(loc),
            Keyword::Block => self.parse_block(loc),
            Keyword::Extends => self.parse_extends(loc),
            Keyword::Include => self.parse_include(loc),
            Keyword::Embed => self.parse_embed(loc),
            Keyword::Filter => self.parse_filter_block(loc),
            Keyword::Autoescape => self.parse_autoescape(loc),
            Keyword::Spaceless => self.parse_spaceless(loc),
            _ => Err(self.err(ErrKind::SyntaxError, "unexpected command keyword")),
        }?;

        Ok(result)
    }

    fn expect_command_end(&mut self) -> Result<(), ParseError> {
        if !matches!(self.cur().map(|t| &t.kind), Some(TokenKind::CommandEnd)) {
            return Err(self.err(ErrKind::SyntaxError, "expected '%}'"));
        }
        self.advance();
        Ok(())
    }

    fn expect_command_begin(&mut self) -> Result<(), ParseError> {
        if !matches!(self.cur().map(|t| &t.kind), Some(TokenKind::CommandBegin)) {
            return Err(self.err(ErrKind::SyntaxError, "expected '{%'"));
        }
        self.advance();
        Ok(())
    }

    // ---- command forms ---------------------------------------------

    fn parse_set(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let name = self.expect_symbol()?;
        self.expect_operator(Op::Assign, "'='")?;
        let value = self.parse_ternary()?;
        self.expect_command_end()?;
        Ok(self.node(loc, Kind::Set { name, slot: None, value: Box::new(value) }))
    }

    fn parse_if(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let condition = self.parse_ternary()?;
        self.expect_command_end()?;
        let on_true = self.parse_items_until(&[Keyword::ElseIf, Keyword::Else, Keyword::EndIf])?;

        let on_false = if self.next_command_keyword() == Some(Keyword::ElseIf) {
            self.expect_command_begin()?;
            self.advance(); // ElseIf
            let elseif_loc = self.cur_loc();
            Some(Box::new(self.parse_if(elseif_loc)?))
        } else if self.next_command_keyword() == Some(Keyword::Else) {
            self.expect_command_begin()?;
            self.advance(); // Else
            self.expect_command_end()?;
            let body = self.parse_items_until(&[Keyword::EndIf])?;
            self.expect_command_begin()?;
            self.expect_keyword(Keyword::EndIf, "endif")?;
            self.expect_command_end()?;
            Some(Box::new(body))
        } else {
            self.expect_command_begin()?;
            self.expect_keyword(Keyword::EndIf, "endif")?;
            self.expect_command_end()?;
            None
        };

        Ok(self.node(loc, Kind::IfClause { condition: Box::new(condition), on_true: Box::new(on_true), on_false }))
    }

    fn parse_for(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let first = self.expect_symbol()?;
        let (key, variable) = if self.is_operator(Op::Comma) {
            self.advance();
            let value_name = self.expect_symbol()?;
            (Some(first), value_name)
        } else {
            (None, first)
        };
        self.expect_keyword(Keyword::In, "'in'")?;
        let iterable = self.parse_ternary()?;

        let condition = if self.is_keyword(Keyword::If) {
            self.advance();
            Some(Box::new(self.parse_ternary()?))
        } else {
            None
        };

        self.expect_command_end()?;
        let body = self.parse_items_until(&[Keyword::Else, Keyword::EndFor])?;

        let or_else = if self.next_command_keyword() == Some(Keyword::Else) {
            self.expect_command_begin()?;
            self.advance();
            self.expect_command_end()?;
            let body = self.parse_items_until(&[Keyword::EndFor])?;
            self.expect_command_begin()?;
            self.expect_keyword(Keyword::EndFor, "endfor")?;
            self.expect_command_end()?;
            Some(Box::new(body))
        } else {
            self.expect_command_begin()?;
            self.expect_keyword(Keyword::EndFor, "endfor")?;
            self.expect_command_end()?;
            None
        };

        Ok(self.node(
            loc,
            Kind::ForLoop {
                variable,
                key,
                variable_slot: None,
                key_slot: None,
                iterable: Box::new(iterable),
                body: Box::new(body),
                or_else,
                condition,
                loop_slot: None,
            },
        ))
    }

    fn parse_block(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let name = self.expect_symbol()?;
        self.expect_command_end()?;
        let body = self.parse_items_until(&[Keyword::EndBlock])?;
        self.expect_command_begin()?;
        self.expect_keyword(Keyword::EndBlock, "endblock")?;
        if let Some(Token { kind: TokenKind::Symbol(_), .. }) = self.cur() {
            let end_name = self.expect_symbol()?;
            if end_name != name {
                return Err(ParseError {
                    kind: ErrKind::BadEndblockName,
                    message: format!("endblock name '{end_name}' does not match block '{name}'"),
                    location: self.cur_loc(),
                });
            }
        }
        self.expect_command_end()?;

        Ok(self.node(loc, Kind::Block { name, body: std::rc::Rc::new(std::cell::RefCell::new(body)) }))
    }

    fn parse_extends(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let name_expr = self.parse_ternary()?;
        self.expect_command_end()?;
        Ok(self.node(
            loc,
            Kind::Include { name_expr: Some(Box::new(name_expr)), names: Vec::new(), is_extends: true, sub_tree: None },
        ))
    }

    fn parse_include(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let name_expr = self.parse_ternary()?;
        self.expect_command_end()?;
        Ok(self.node(
            loc,
            Kind::Include { name_expr: Some(Box::new(name_expr)), names: Vec::new(), is_extends: false, sub_tree: None },
        ))
    }

    fn parse_embed(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let name_expr = self.parse_ternary()?;
        self.expect_command_end()?;
        let overrides = self.parse_items_until(&[Keyword::EndEmbed])?;
        self.expect_command_begin()?;
        self.expect_keyword(Keyword::EndEmbed, "endembed")?;
        self.expect_command_end()?;
        Ok(self.node(
            loc,
            Kind::Embed {
                name_expr: Some(Box::new(name_expr)),
                names: Vec::new(),
                overrides: Box::new(overrides),
                sub_tree: None,
            },
        ))
    }

    fn parse_filter_block(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let chain = self.parse_filter_chain_names()?;
        self.expect_command_end()?;
        let body = self.parse_items_until(&[Keyword::EndFilter])?;
        self.expect_command_begin()?;
        self.expect_keyword(Keyword::EndFilter, "endfilter")?;
        self.expect_command_end()?;
        Ok(self.node(loc, Kind::Filter { chain: Box::new(chain), body: Box::new(body) }))
    }

    /// Parses `name1|name2(args)|name3` into the left-leaning MethodCall
    /// chain (spec §9), rooted at the outermost call, with a
    /// `FilterBodyPlaceholder` occupying the innermost call's first
    /// argument slot.
    fn parse_filter_chain_names(&mut self) -> Result<Ast, ParseError> {
        let loc = self.cur_loc();
        let name = self.expect_symbol()?;
        let mut args = vec![self.node(loc, Kind::FilterBodyPlaceholder)];
        if self.is_operator(Op::LParen) {
            self.advance();
            args.extend(self.parse_call_args()?);
        }
        let mut chain = self.node(loc, Kind::MethodCall { name, arguments: args });

        while self.is_operator(Op::Pipe) {
            self.advance();
            let loc = self.cur_loc();
            let name = self.expect_symbol()?;
            let mut args = vec![chain];
            if self.is_operator(Op::LParen) {
                self.advance();
                args.extend(self.parse_call_args()?);
            }
            chain = self.node(loc, Kind::MethodCall { name, arguments: args });
        }

        Ok(chain)
    }

    fn parse_autoescape(&mut self, loc: Location) -> Result<Ast, ParseError> {
        let mode_name = if matches!(self.cur().map(|t| &t.kind), Some(TokenKind::Literal(Literal::Str(_)))) {
            Some(self.expect_string()?)
        } else {
            None
        };
        self.expect_command_end()?;
        let body = self.parse_items_until(&[Keyword::EndAutoescape])?;
        self.expect_command_begin()?;
        self.expect_keyword(Keyword::EndAutoescape, "endautoescape")?;
        self.expect_command_end()?;

        Ok(self.node(loc, Kind::Autoescape { mode_name, mode: crate::program::EscapeMode::Html, body: Box::new(body) }))
    }

    fn parse_spaceless(&mut self, loc: Location) -> Result<Ast, ParseError> {
        self.expect_command_end()?;
        let body = self.parse_items_until(&[Keyword::EndSpaceless])?;
        self.expect_command_begin()?;
        self.expect_keyword(Keyword::EndSpaceless, "endspaceless")?;
        self.expect_command_end()?;
        Ok(self.node(loc, Kind::Spaceless { body: Box::new(body) }))
    }

    // ---- expression grammar -----------------------------------------

    fn parse_ternary(&mut self) -> Result<Ast, ParseError> {
        let loc = self.cur_loc();
        let condition = self.parse_or()?;
        if self.is_operator(Op::Question) {
            self.advance();
            let on_success = if self.is_operator(Op::Colon) {
                None
            } else {
                Some(Box::new(self.parse_ternary()?))
            };
            self.expect_operator(Op::Colon, "':'")?;
            let on_failure = Some(Box::new(self.parse_ternary()?));
            return Ok(self.node(loc, Kind::Ternary { condition: Box::new(condition), on_success, on_failure }));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_and()?;
        while self.is_keyword(Keyword::Or) {
            let loc = self.cur_loc();
            self.advance();
            let right = self.parse_and()?;
            left = self.node(loc, Kind::Expression { op: Operator::Or, left: Box::new(left), right: Some(Box::new(right)) });
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_in()?;
        while self.is_keyword(Keyword::And) {
            let loc = self.cur_loc();
            self.advance();
            let right = self.parse_in()?;
            left = self.node(loc, Kind::Expression { op: Operator::And, left: Box::new(left), right: Some(Box::new(right)) });
        }
        Ok(left)
    }

    fn parse_in(&mut self) -> Result<Ast, ParseError> {
        let left = self.parse_comparison()?;
        let loc = self.cur_loc();
        if self.is_keyword(Keyword::Not) && matches!(self.tokens.get(self.pos + 1), Some(Token { kind: TokenKind::Keyword(Keyword::In), .. })) {
            self.advance();
            self.advance();
            let right = self.parse_comparison()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::NotIn, left: Box::new(left), right: Some(Box::new(right)) }));
        }
        if self.is_keyword(Keyword::In) {
            self.advance();
            let right = self.parse_comparison()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::In, left: Box::new(left), right: Some(Box::new(right)) }));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Ast, ParseError> {
        let left = self.parse_concat()?;
        let loc = self.cur_loc();

        let op = if self.is_operator(Op::Eq) {
            Some(Operator::Eq)
        } else if self.is_operator(Op::Ne) {
            Some(Operator::Ne)
        } else if self.is_operator(Op::Lt) {
            Some(Operator::Lt)
        } else if self.is_operator(Op::Le) {
            Some(Operator::Le)
        } else if self.is_operator(Op::Gt) {
            Some(Operator::Gt)
        } else if self.is_operator(Op::Ge) {
            Some(Operator::Ge)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_concat()?;
            return Ok(self.node(loc, Kind::Expression { op, left: Box::new(left), right: Some(Box::new(right)) }));
        }

        if self.is_symbol("matches") {
            self.advance();
            let test = self.parse_concat()?;
            return Ok(self.node(loc, Kind::MatchesTest { value: Box::new(left), test: Some(Box::new(test)), compiled_regex: None }));
        }

        if self.is_symbol("starts") && matches!(self.tokens.get(self.pos + 1), Some(Token { kind: TokenKind::Symbol(s), .. }) if s == "with") {
            self.advance();
            self.advance();
            let right = self.parse_concat()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::StartsWith, left: Box::new(left), right: Some(Box::new(right)) }));
        }

        if self.is_symbol("ends") && matches!(self.tokens.get(self.pos + 1), Some(Token { kind: TokenKind::Symbol(s), .. }) if s == "with") {
            self.advance();
            self.advance();
            let right = self.parse_concat()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::EndsWith, left: Box::new(left), right: Some(Box::new(right)) }));
        }

        if self.is_symbol("divisible") && matches!(self.tokens.get(self.pos + 1), Some(Token { kind: TokenKind::Symbol(s), .. }) if s == "by") {
            self.advance();
            self.advance();
            let right = self.parse_concat()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::DivisibleBy, left: Box::new(left), right: Some(Box::new(right)) }));
        }

        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_additive()?;
        while self.is_operator(Op::Tilde) {
            let loc = self.cur_loc();
            self.advance();
            let right = self.parse_additive()?;
            left = self.node(loc, Kind::Expression { op: Operator::Concat, left: Box::new(left), right: Some(Box::new(right)) });
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.is_operator(Op::Plus) {
                Operator::Add
            } else if self.is_operator(Op::Minus) {
                Operator::Sub
            } else {
                break;
            };
            let loc = self.cur_loc();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.node(loc, Kind::Expression { op, left: Box::new(left), right: Some(Box::new(right)) });
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_power()?;
        loop {
            let op = if self.is_operator(Op::Star) {
                Operator::Mul
            } else if self.is_operator(Op::Slash) {
                Operator::Div
            } else if self.is_operator(Op::Percent) {
                Operator::Mod
            } else {
                break;
            };
            let loc = self.cur_loc();
            self.advance();
            let right = self.parse_power()?;
            left = self.node(loc, Kind::Expression { op, left: Box::new(left), right: Some(Box::new(right)) });
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Ast, ParseError> {
        let left = self.parse_unary()?;
        if self.is_operator(Op::Power) {
            let loc = self.cur_loc();
            self.advance();
            let right = self.parse_power()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::Pow, left: Box::new(left), right: Some(Box::new(right)) }));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, ParseError> {
        let loc = self.cur_loc();
        if self.is_keyword(Keyword::Not) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::Not, left: Box::new(operand), right: None }));
        }
        if self.is_operator(Op::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.node(loc, Kind::Expression { op: Operator::Neg, left: Box::new(operand), right: None }));
        }
        self.parse_test()
    }

    fn parse_test(&mut self) -> Result<Ast, ParseError> {
        let value = self.parse_filter()?;
        if self.is_keyword(Keyword::Is) {
            let loc = self.cur_loc();
            self.advance();
            let negate = if self.is_keyword(Keyword::Not) {
                self.advance();
                true
            } else {
                false
            };
            let name = self.expect_symbol()?;
            let op = match name.as_str() {
                "defined" => Operator::IsDefined,
                "null" | "none" => Operator::IsNull,
                "empty" => Operator::IsEmpty,
                "iterable" => Operator::IsIterable,
                "even" => Operator::IsEven,
                "odd" => Operator::IsOdd,
                _ => return Err(self.err(ErrKind::SyntaxError, format!("unknown test '{name}'"))),
            };
            let test_node = self.node(loc, Kind::Expression { op, left: Box::new(value), right: None });
            if negate {
                return Ok(self.node(loc, Kind::Expression { op: Operator::Not, left: Box::new(test_node), right: None }));
            }
            return Ok(test_node);
        }
        Ok(value)
    }

    fn parse_filter(&mut self) -> Result<Ast, ParseError> {
        let mut value = self.parse_postfix()?;
        while self.is_operator(Op::Pipe) {
            let loc = self.cur_loc();
            self.advance();
            let name = self.expect_symbol()?;
            let mut args = vec![value];
            if self.is_operator(Op::LParen) {
                self.advance();
                args.extend(self.parse_call_args()?);
            }
            value = self.node(loc, Kind::MethodCall { name, arguments: args });
        }
        Ok(value)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Ast>, ParseError> {
        let mut args = Vec::new();
        if self.is_operator(Op::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_ternary()?);
            if self.is_operator(Op::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_operator(Op::RParen, "')'")?;
        Ok(args)
    }

    fn parse_postfix(&mut self) -> Result<Ast, ParseError> {
        let mut base = self.parse_atom()?;
        loop {
            if self.is_operator(Op::Dot) {
                let loc = self.cur_loc();
                self.advance();
                let name = self.expect_symbol()?;
                if self.is_operator(Op::LParen) {
                    self.advance();
                    let mut args = vec![base];
                    args.extend(self.parse_call_args()?);
                    base = self.node(loc, Kind::MethodCall { name, arguments: args });
                } else {
                    let key = self.node(loc, Kind::Literal(crate::value::Value::Str(name)));
                    base = self.chain_append(loc, base, key);
                }
            } else if self.is_operator(Op::LBracket) {
                let loc = self.cur_loc();
                self.advance();
                let key = self.parse_ternary()?;
                self.expect_operator(Op::RBracket, "']'")?;
                base = self.chain_append(loc, base, key);
            } else if self.is_operator(Op::LParen) {
                let loc = self.cur_loc();
                if let Kind::Variable { name, .. } = &base.kind {
                    let name = name.clone();
                    self.advance();
                    let args = self.parse_call_args()?;
                    base = self.node(loc, Kind::MethodCall { name, arguments: args });
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(base)
    }

    fn chain_append(&mut self, loc: Location, base: Ast, key: Ast) -> Ast {
        match base.kind {
            Kind::ChainedVariable { base: inner_base, mut chain } => {
                chain.push(key);
                self.node(loc, Kind::ChainedVariable { base: inner_base, chain })
            }
            _ => self.node(loc, Kind::ChainedVariable { base: Box::new(base), chain: vec![key] }),
        }
    }

    fn parse_atom(&mut self) -> Result<Ast, ParseError> {
        let loc = self.cur_loc();
        match self.cur().map(|t| &t.kind).cloned() {
            Some(TokenKind::Literal(Literal::Int(n))) => {
                self.advance();
                Ok(self.node(loc, Kind::Literal(crate::value::Value::Int(n))))
            }
            Some(TokenKind::Literal(Literal::Float(n))) => {
                self.advance();
                Ok(self.node(loc, Kind::Literal(crate::value::Value::Float(n))))
            }
            Some(TokenKind::Literal(Literal::Bool(b))) => {
                self.advance();
                Ok(self.node(loc, Kind::Literal(crate::value::Value::Bool(b))))
            }
            Some(TokenKind::Literal(Literal::Str(s))) => {
                self.advance();
                Ok(self.parse_string_literal(s, loc))
            }
            Some(TokenKind::Symbol(ref s)) if s == "null" => {
                self.advance();
                Ok(self.node(loc, Kind::Literal(crate::value::Value::Null)))
            }
            Some(TokenKind::Symbol(name)) => {
                self.advance();
                Ok(self.node(loc, Kind::Variable { name, slot: None, write: false }))
            }
            Some(TokenKind::Operator(Op::LParen)) => {
                self.advance();
                let inner = self.parse_ternary()?;
                self.expect_operator(Op::RParen, "')'")?;
                Ok(inner)
            }
            Some(TokenKind::Operator(Op::LBracket)) => {
                self.advance();
                let mut items = Vec::new();
                if !self.is_operator(Op::RBracket) {
                    loop {
                        items.push(self.parse_ternary()?);
                        if self.is_operator(Op::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect_operator(Op::RBracket, "']'")?;
                Ok(self.node(loc, Kind::MultipleValue(items)))
            }
            _ => Err(self.err(ErrKind::SyntaxError, "unexpected token in expression")),
        }
    }

    /// Scans a string literal's raw text for `#{…}` interpolation inserts,
    /// parsing each snippet as `{{ snippet }}` and recording its offset and
    /// placeholder length in the original template.
    fn parse_string_literal(&mut self, raw: String, loc: Location) -> Ast {
        let mut inserts = Vec::new();
        let bytes: Vec<char> = raw.chars().collect();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == '#' && bytes.get(i + 1) == Some(&'{') {
                let start = i;
                let mut depth = 1;
                let mut j = i + 2;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                let snippet: String = bytes[start + 2..j.saturating_sub(1)].iter().collect();
                let wrapped = format!("{{{{ {snippet} }}}}");
                if let Ok(tokens) = crate::tokenizer::tokenize(&wrapped) {
                    if let Ok((node, _, _)) = parse(tokens) {
                        if let Kind::Multiple(mut items) = node.kind {
                            if let Some(expr) = items.pop() {
                                inserts.push((start, j - start, expr));
                            }
                        }
                    }
                }
                i = j;
            } else {
                i += 1;
            }
        }
        self.node(loc, Kind::StringLit { template: raw, inserts })
    }
}
