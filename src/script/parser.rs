use crate::error::{ScriptError, Span};
use crate::script::ast::{
    AssignOp, AssignTarget, BinaryOp, Expr, LogicalOp, Program, Stmt, TemplatePart, UnaryOp,
};
use crate::script::lexer::{parse_number, unescape, Lexer, Token, TokenType};
use crate::script::value::Value;

/// Nesting bound for the recursive-descent routines; deeper input is
/// rejected instead of riding the native stack down.
const MAX_NESTING_DEPTH: usize = 200;

/// Recursive-descent parser over the token stream. Precedence mirrors the
/// source language: assignment, ternary, `||`, `&&`, equality, comparison,
/// additive, multiplicative, unary, update, call/member chains, primary.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Program, ScriptError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.declaration()?);
        }
        Ok(Program { statements })
    }

    fn declaration(&mut self) -> Result<Stmt, ScriptError> {
        // var is accepted and behaves as let
        if self.match_types(&[TokenType::Let, TokenType::Var]) {
            let stmt = self.var_declaration(false)?;
            self.match_types(&[TokenType::Semicolon]);
            return Ok(stmt);
        }
        if self.match_types(&[TokenType::Const]) {
            let stmt = self.var_declaration(true)?;
            self.match_types(&[TokenType::Semicolon]);
            return Ok(stmt);
        }
        if self.check(&TokenType::Function) && self.check_next(&TokenType::Identifier) {
            self.advance();
            return self.function_declaration();
        }
        self.statement()
    }

    fn var_declaration(&mut self, constant: bool) -> Result<Stmt, ScriptError> {
        let keyword_span = self.previous().span;
        let name_token = self.consume(TokenType::Identifier, "Expected variable name")?;
        let name = name_token.lexeme.clone();
        let mut span = keyword_span.merge(name_token.span);

        let initializer = if self.match_types(&[TokenType::Equal]) {
            let value = self.expression()?;
            span = span.merge(value.span());
            Some(value)
        } else if constant {
            return Err(ScriptError::syntax(
                span,
                "Missing initializer in const declaration".to_string(),
            ));
        } else {
            None
        };

        Ok(Stmt::Declaration {
            name,
            initializer,
            constant,
            span,
        })
    }

    fn function_declaration(&mut self) -> Result<Stmt, ScriptError> {
        let keyword_span = self.previous().span;
        let name = self
            .consume(TokenType::Identifier, "Expected function name")?
            .lexeme
            .clone();
        self.consume(TokenType::LeftParen, "Expected '(' after function name")?;
        let params = self.parameters()?;
        self.consume_with_help(
            TokenType::LeftBrace,
            "Expected '{' before function body",
            "function bodies must be wrapped in braces".to_string(),
        )?;
        let (body, end) = self.block_statements()?;

        Ok(Stmt::Function {
            name,
            params,
            body,
            span: Span::new(keyword_span.start, end),
        })
    }

    /// Comma-separated parameter names, consuming through the closing ')'.
    fn parameters(&mut self) -> Result<Vec<String>, ScriptError> {
        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                let param = self
                    .consume(TokenType::Identifier, "Expected parameter name")?
                    .lexeme
                    .clone();
                params.push(param);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after parameters")?;
        Ok(params)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.descend("Statement")?;
        let statement = self.dispatch_statement()?;
        self.ascend();
        Ok(statement)
    }

    fn dispatch_statement(&mut self) -> Result<Stmt, ScriptError> {
        if self.match_types(&[TokenType::LeftBrace]) {
            let start = self.previous().span.start;
            let (statements, end) = self.block_statements()?;
            return Ok(Stmt::Block {
                statements,
                span: Span::new(start, end),
            });
        }
        if self.match_types(&[TokenType::If]) {
            return self.if_statement();
        }
        if self.match_types(&[TokenType::While]) {
            return self.while_statement();
        }
        if self.match_types(&[TokenType::For]) {
            return self.for_statement();
        }
        if self.match_types(&[TokenType::Return]) {
            return self.return_statement();
        }
        if self.match_types(&[TokenType::Break]) {
            let span = self.previous().span;
            self.match_types(&[TokenType::Semicolon]);
            return Ok(Stmt::Break { span });
        }
        if self.match_types(&[TokenType::Continue]) {
            let span = self.previous().span;
            self.match_types(&[TokenType::Semicolon]);
            return Ok(Stmt::Continue { span });
        }
        if self.match_types(&[TokenType::Throw]) {
            return self.throw_statement();
        }
        // Empty statement, e.g. the body of `for (;;) ;`
        if self.match_types(&[TokenType::Semicolon]) {
            let span = self.previous().span;
            return Ok(Stmt::Block {
                statements: Vec::new(),
                span,
            });
        }
        self.expression_statement()
    }

    fn block_statements(&mut self) -> Result<(Vec<Stmt>, usize), ScriptError> {
        let mut statements = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            statements.push(self.declaration()?);
        }
        let end = self
            .consume_with_help(
                TokenType::RightBrace,
                "Expected '}' after block",
                "every '{' needs a matching '}'".to_string(),
            )?
            .span
            .end;
        Ok((statements, end))
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.previous().span.start;
        self.consume(TokenType::LeftParen, "Expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after condition")?;

        let then_branch = Box::new(self.statement()?);
        let (else_branch, end) = if self.match_types(&[TokenType::Else]) {
            let branch = self.statement()?;
            let end = branch.span().end;
            (Some(Box::new(branch)), end)
        } else {
            (None, then_branch.span().end)
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: Span::new(start, end),
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.previous().span.start;
        self.consume(TokenType::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after condition")?;
        let body = Box::new(self.statement()?);
        let end = body.span().end;

        Ok(Stmt::While {
            condition,
            body,
            span: Span::new(start, end),
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.previous().span.start;
        self.consume(TokenType::LeftParen, "Expected '(' after 'for'")?;

        let initializer = if self.match_types(&[TokenType::Semicolon]) {
            None
        } else if self.match_types(&[TokenType::Let, TokenType::Var]) {
            let decl = self.var_declaration(false)?;
            self.consume(TokenType::Semicolon, "Expected ';' after loop initializer")?;
            Some(Box::new(decl))
        } else if self.match_types(&[TokenType::Const]) {
            let decl = self.var_declaration(true)?;
            self.consume(TokenType::Semicolon, "Expected ';' after loop initializer")?;
            Some(Box::new(decl))
        } else {
            let expr = self.expression()?;
            let span = expr.span();
            self.consume(TokenType::Semicolon, "Expected ';' after loop initializer")?;
            Some(Box::new(Stmt::Expression { expr, span }))
        };

        let condition = if self.check(&TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::Semicolon, "Expected ';' after loop condition")?;

        let increment = if self.check(&TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::RightParen, "Expected ')' after for clauses")?;

        let body = Box::new(self.statement()?);
        let end = body.span().end;

        Ok(Stmt::For {
            initializer,
            condition,
            increment,
            body,
            span: Span::new(start, end),
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, ScriptError> {
        let keyword_span = self.previous().span;
        let value = if self.check(&TokenType::Semicolon)
            || self.check(&TokenType::RightBrace)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.expression()?)
        };
        let end = value
            .as_ref()
            .map(|v| v.span().end)
            .unwrap_or(keyword_span.end);
        self.match_types(&[TokenType::Semicolon]);

        Ok(Stmt::Return {
            value,
            span: Span::new(keyword_span.start, end),
        })
    }

    fn throw_statement(&mut self) -> Result<Stmt, ScriptError> {
        let keyword_span = self.previous().span;
        let value = self.expression()?;
        let span = Span::new(keyword_span.start, value.span().end);
        self.match_types(&[TokenType::Semicolon]);
        Ok(Stmt::Throw { value, span })
    }

    fn expression_statement(&mut self) -> Result<Stmt, ScriptError> {
        let expr = self.expression()?;
        let span = expr.span();
        self.match_types(&[TokenType::Semicolon]);
        Ok(Stmt::Expression { expr, span })
    }

    pub fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        // Every nested expression context re-enters here, so this is the
        // one place expression depth is metered
        self.descend("Expression")?;
        let expr = self.ternary()?;

        let op = match self.peek().token_type {
            TokenType::Equal => Some(AssignOp::Set),
            TokenType::PlusEqual => Some(AssignOp::Add),
            TokenType::MinusEqual => Some(AssignOp::Subtract),
            TokenType::StarEqual => Some(AssignOp::Multiply),
            TokenType::SlashEqual => Some(AssignOp::Divide),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let value = self.assignment()?;
            let target = lvalue(expr, "Invalid assignment target")?;
            let span = target.span().merge(value.span());
            self.ascend();
            return Ok(Expr::Assign {
                target,
                op,
                value: Box::new(value),
                span,
            });
        }

        self.ascend();
        Ok(expr)
    }

    fn ternary(&mut self) -> Result<Expr, ScriptError> {
        let condition = self.logical_or()?;

        if self.match_types(&[TokenType::Question]) {
            let then_value = self.assignment()?;
            self.consume(TokenType::Colon, "Expected ':' in conditional expression")?;
            let else_value = self.assignment()?;
            let span = condition.span().merge(else_value.span());
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
                span,
            });
        }

        Ok(condition)
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.logical_and()?;
        while self.match_types(&[TokenType::PipePipe]) {
            let right = self.logical_and()?;
            let span = expr.span().merge(right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.equality()?;
        while self.match_types(&[TokenType::AmpAmp]) {
            let right = self.equality()?;
            let span = expr.span().merge(right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.comparison()?;
        // Loose forms alias to strict comparison
        while self.match_types(&[
            TokenType::EqualEqualEqual,
            TokenType::EqualEqual,
            TokenType::BangEqualEqual,
            TokenType::BangEqual,
        ]) {
            let operator = match self.previous().token_type {
                TokenType::EqualEqualEqual | TokenType::EqualEqual => BinaryOp::Equal,
                _ => BinaryOp::NotEqual,
            };
            let right = self.comparison()?;
            let span = expr.span().merge(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.term()?;
        while self.match_types(&[
            TokenType::Greater,
            TokenType::GreaterEqual,
            TokenType::Less,
            TokenType::LessEqual,
        ]) {
            let operator = match self.previous().token_type {
                TokenType::Greater => BinaryOp::Greater,
                TokenType::GreaterEqual => BinaryOp::GreaterEqual,
                TokenType::Less => BinaryOp::Less,
                _ => BinaryOp::LessEqual,
            };
            let right = self.term()?;
            let span = expr.span().merge(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.factor()?;
        while self.match_types(&[TokenType::Plus, TokenType::Minus]) {
            let operator = if self.previous().token_type == TokenType::Plus {
                BinaryOp::Add
            } else {
                BinaryOp::Subtract
            };
            let right = self.factor()?;
            let span = expr.span().merge(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.unary()?;
        while self.match_types(&[TokenType::Star, TokenType::Slash, TokenType::Percent]) {
            let operator = match self.previous().token_type {
                TokenType::Star => BinaryOp::Multiply,
                TokenType::Slash => BinaryOp::Divide,
                _ => BinaryOp::Modulo,
            };
            let right = self.unary()?;
            let span = expr.span().merge(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        if self.match_types(&[TokenType::Bang, TokenType::Minus, TokenType::Typeof]) {
            let operator = match self.previous().token_type {
                TokenType::Bang => UnaryOp::Not,
                TokenType::Minus => UnaryOp::Negate,
                _ => UnaryOp::TypeOf,
            };
            let op_span = self.previous().span;
            // Operator chains recurse without passing assignment()
            self.descend("Expression")?;
            let operand = self.unary()?;
            self.ascend();
            let span = Span::new(op_span.start, operand.span().end);
            return Ok(Expr::Unary {
                operator,
                operand: Box::new(operand),
                span,
            });
        }

        if self.match_types(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
            let increment = self.previous().token_type == TokenType::PlusPlus;
            let op_span = self.previous().span;
            self.descend("Expression")?;
            let operand = self.unary()?;
            self.ascend();
            let target = lvalue(operand, "Invalid update target")?;
            let span = Span::new(op_span.start, target.span().end);
            return Ok(Expr::Update {
                target,
                increment,
                prefix: true,
                span,
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let expr = self.call()?;

        if self.check(&TokenType::PlusPlus) || self.check(&TokenType::MinusMinus) {
            let increment = self.peek().token_type == TokenType::PlusPlus;
            let op_span = self.peek().span;
            self.advance();
            let target = lvalue(expr, "Invalid update target")?;
            let span = Span::new(target.span().start, op_span.end);
            return Ok(Expr::Update {
                target,
                increment,
                prefix: false,
                span,
            });
        }

        Ok(expr)
    }

    fn call(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = if self.match_types(&[TokenType::New]) {
            self.new_expression()?
        } else {
            self.primary()?
        };

        loop {
            if self.match_types(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                let property_token =
                    self.consume(TokenType::Identifier, "Expected property name after '.'")?;
                let property = property_token.lexeme.clone();
                let span = expr.span().merge(property_token.span);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    span,
                };
            } else if self.match_types(&[TokenType::LeftBracket]) {
                let index = self.expression()?;
                let end = self
                    .consume(TokenType::RightBracket, "Expected ']' after index")?
                    .span
                    .end;
                let span = Span::new(expr.span().start, end);
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// `new` binds to the member chain of its callee before the argument
    /// list, so `new a.B().m()` calls `m` on the constructed value.
    fn new_expression(&mut self) -> Result<Expr, ScriptError> {
        let keyword_span = self.previous().span;
        let mut callee = self.primary()?;

        loop {
            if self.match_types(&[TokenType::Dot]) {
                let property_token =
                    self.consume(TokenType::Identifier, "Expected property name after '.'")?;
                let property = property_token.lexeme.clone();
                let span = callee.span().merge(property_token.span);
                callee = Expr::Member {
                    object: Box::new(callee),
                    property,
                    span,
                };
            } else if self.match_types(&[TokenType::LeftBracket]) {
                let index = self.expression()?;
                let end = self
                    .consume(TokenType::RightBracket, "Expected ']' after index")?
                    .span
                    .end;
                let span = Span::new(callee.span().start, end);
                callee = Expr::Index {
                    object: Box::new(callee),
                    index: Box::new(index),
                    span,
                };
            } else {
                break;
            }
        }

        let args = if self.match_types(&[TokenType::LeftParen]) {
            self.arguments()?
        } else {
            Vec::new()
        };
        let end = self.previous().span.end;

        Ok(Expr::New {
            callee: Box::new(callee),
            args,
            span: Span::new(keyword_span.start, end),
        })
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, ScriptError> {
        let args = self.arguments()?;
        let end = self.previous().span.end;
        let span = Span::new(callee.span().start, end);
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    /// Comma-separated arguments, consuming through the closing ')'.
    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                args.push(self.assignment()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after arguments",
            "every '(' needs a matching ')'".to_string(),
        )?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        if self.check(&TokenType::LeftParen) && self.arrow_ahead() {
            return self.arrow_function();
        }

        if self.match_types(&[TokenType::True]) {
            return Ok(Expr::Literal {
                value: Value::Bool(true),
                span: self.previous().span,
            });
        }
        if self.match_types(&[TokenType::False]) {
            return Ok(Expr::Literal {
                value: Value::Bool(false),
                span: self.previous().span,
            });
        }
        if self.match_types(&[TokenType::Null]) {
            return Ok(Expr::Literal {
                value: Value::Null,
                span: self.previous().span,
            });
        }

        if self.match_types(&[TokenType::Number]) {
            let token = self.previous();
            let span = token.span;
            let lexeme = token.lexeme.clone();
            let number = parse_number(&lexeme).ok_or_else(|| {
                ScriptError::syntax(span, format!("Invalid number literal: {}", lexeme))
            })?;
            return Ok(Expr::Literal {
                value: Value::Number(number),
                span,
            });
        }

        if self.match_types(&[TokenType::Str]) {
            let token = self.previous();
            return Ok(Expr::Literal {
                value: Value::Str(token.lexeme.clone()),
                span: token.span,
            });
        }

        if self.match_types(&[TokenType::Template]) {
            let token = self.previous().clone();
            return self.template_literal(&token);
        }

        if self.match_types(&[TokenType::Identifier]) {
            let name = self.previous().lexeme.clone();
            let span = self.previous().span;
            if self.match_types(&[TokenType::Arrow]) {
                return self.arrow_body(span.start, vec![name]);
            }
            return Ok(Expr::Variable { name, span });
        }

        if self.match_types(&[TokenType::Function]) {
            return self.function_expression();
        }

        if self.match_types(&[TokenType::LeftParen]) {
            let start = self.previous().span.start;
            let expr = self.expression()?;
            let end = self
                .consume_with_help(
                    TokenType::RightParen,
                    "Expected ')' after expression",
                    "every '(' needs a matching ')'".to_string(),
                )?
                .span
                .end;
            return Ok(Expr::Grouping {
                expr: Box::new(expr),
                span: Span::new(start, end),
            });
        }

        if self.match_types(&[TokenType::LeftBracket]) {
            return self.array_literal();
        }
        if self.match_types(&[TokenType::LeftBrace]) {
            return self.object_literal();
        }

        let span = self.error_span();
        let found = if self.is_at_end() {
            "end of input".to_string()
        } else {
            format!("'{}'", self.peek().lexeme)
        };
        Err(ScriptError::syntax(
            span,
            format!("Expected expression, found {}", found),
        ))
    }

    fn function_expression(&mut self) -> Result<Expr, ScriptError> {
        let start = self.previous().span.start;
        let name = if self.check(&TokenType::Identifier) {
            Some(self.advance().lexeme.clone())
        } else {
            None
        };
        self.consume(TokenType::LeftParen, "Expected '(' after 'function'")?;
        let params = self.parameters()?;
        self.consume_with_help(
            TokenType::LeftBrace,
            "Expected '{' before function body",
            "function bodies must be wrapped in braces".to_string(),
        )?;
        let (body, end) = self.block_statements()?;

        Ok(Expr::Function {
            name,
            params,
            body,
            span: Span::new(start, end),
        })
    }

    /// Token scan from an opening '(' to decide grouping versus arrow
    /// parameter list: the matching ')' must be followed by '=>'.
    fn arrow_ahead(&self) -> bool {
        let mut depth = 0;
        let mut index = self.current;
        while index < self.tokens.len() {
            match self.tokens[index].token_type {
                TokenType::LeftParen => depth += 1,
                TokenType::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self
                            .tokens
                            .get(index + 1)
                            .is_some_and(|t| t.token_type == TokenType::Arrow);
                    }
                }
                TokenType::Eof => return false,
                _ => {}
            }
            index += 1;
        }
        false
    }

    fn arrow_function(&mut self) -> Result<Expr, ScriptError> {
        let start = self.peek().span.start;
        self.advance();
        let params = self.parameters()?;
        self.consume(TokenType::Arrow, "Expected '=>' after parameters")?;
        self.arrow_body(start, params)
    }

    fn arrow_body(&mut self, start: usize, params: Vec<String>) -> Result<Expr, ScriptError> {
        if self.match_types(&[TokenType::LeftBrace]) {
            let (body, end) = self.block_statements()?;
            return Ok(Expr::Function {
                name: None,
                params,
                body,
                span: Span::new(start, end),
            });
        }

        // Expression body desugars to a single return
        let value = self.assignment()?;
        let value_span = value.span();
        Ok(Expr::Function {
            name: None,
            params,
            body: vec![Stmt::Return {
                value: Some(value),
                span: value_span,
            }],
            span: Span::new(start, value_span.end),
        })
    }

    fn array_literal(&mut self) -> Result<Expr, ScriptError> {
        let start = self.previous().span.start;
        let mut elements = Vec::new();
        if !self.check(&TokenType::RightBracket) {
            loop {
                elements.push(self.assignment()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
                if self.check(&TokenType::RightBracket) {
                    break;
                }
            }
        }
        let end = self
            .consume_with_help(
                TokenType::RightBracket,
                "Expected ']' after array elements",
                "every '[' needs a matching ']'".to_string(),
            )?
            .span
            .end;

        Ok(Expr::Array {
            elements,
            span: Span::new(start, end),
        })
    }

    fn object_literal(&mut self) -> Result<Expr, ScriptError> {
        let start = self.previous().span.start;
        let mut pairs = Vec::new();

        if !self.check(&TokenType::RightBrace) {
            loop {
                let (key, key_span, shorthand_ok) = if self.match_types(&[TokenType::Identifier]) {
                    (self.previous().lexeme.clone(), self.previous().span, true)
                } else if self.match_types(&[TokenType::Str, TokenType::Number]) {
                    (self.previous().lexeme.clone(), self.previous().span, false)
                } else {
                    return Err(ScriptError::syntax(
                        self.error_span(),
                        "Expected property name".to_string(),
                    ));
                };

                if self.match_types(&[TokenType::Colon]) {
                    let value = self.assignment()?;
                    pairs.push((key, value));
                } else if shorthand_ok {
                    // `{x}` reads the variable of the same name
                    pairs.push((
                        key.clone(),
                        Expr::Variable {
                            name: key,
                            span: key_span,
                        },
                    ));
                } else {
                    return Err(ScriptError::syntax(
                        self.error_span(),
                        "Expected ':' after property name".to_string(),
                    ));
                }

                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
                if self.check(&TokenType::RightBrace) {
                    break;
                }
            }
        }

        let end = self
            .consume_with_help(
                TokenType::RightBrace,
                "Expected '}' after object literal",
                "every '{' needs a matching '}'".to_string(),
            )?
            .span
            .end;

        Ok(Expr::Object {
            pairs,
            span: Span::new(start, end),
        })
    }

    /// Split the raw interior of a backtick template into text and `${}`
    /// expression parts. Each chunk is re-lexed with its absolute byte
    /// offset so spans inside interpolations point into the full source.
    fn template_literal(&mut self, token: &Token) -> Result<Expr, ScriptError> {
        let raw = token.lexeme.as_str();
        let span = token.span;
        // Interior starts one byte past the opening backtick
        let base = span.start + 1;

        let chars: Vec<(usize, char)> = raw.char_indices().collect();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;

        while i < chars.len() {
            let (pos, c) = chars[i];

            if c == '\\' && i + 1 < chars.len() {
                text.push(unescape(chars[i + 1].1));
                i += 2;
                continue;
            }

            if c == '$' && i + 1 < chars.len() && chars[i + 1].1 == '{' {
                let mut depth = 1;
                let mut j = i + 2;
                let mut quote: Option<char> = None;
                while j < chars.len() {
                    let cj = chars[j].1;
                    match quote {
                        Some(q) => {
                            if cj == q {
                                quote = None;
                            } else if cj == '\\' {
                                j += 1;
                            }
                        }
                        None => match cj {
                            '\'' | '"' | '`' => quote = Some(cj),
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        },
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(ScriptError::syntax(
                        span,
                        "Unterminated '${' in template literal".to_string(),
                    ));
                }

                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }

                let chunk = &raw[pos + 2..chars[j].0];
                let chunk_offset = base + pos + 2;
                let tokens = Lexer::with_offset(chunk, chunk_offset).scan_tokens()?;
                let mut sub = Parser::new(tokens);
                // The sub-parser shares this parser's native stack
                sub.depth = self.depth;
                let expr = sub.expression()?;
                if !sub.is_at_end() {
                    return Err(ScriptError::syntax(
                        sub.peek().span,
                        "Unexpected token in template expression".to_string(),
                    ));
                }
                parts.push(TemplatePart::Expr(expr));

                i = j + 1;
                continue;
            }

            text.push(c);
            i += 1;
        }

        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }

        Ok(Expr::Template { parts, span })
    }

    fn descend(&mut self, what: &str) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ScriptError::syntax(
                self.error_span(),
                format!("{} nesting too deep", what),
            ));
        }
        Ok(())
    }

    // Parse errors abort the whole parse, so depth is only unwound on the
    // success paths
    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for token_type in types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            false
        } else {
            &self.peek().token_type == token_type
        }
    }

    fn check_next(&self, token_type: &TokenType) -> bool {
        self.tokens
            .get(self.current + 1)
            .map(|t| &t.token_type == token_type)
            .unwrap_or(false)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, ScriptError> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(ScriptError::syntax(self.error_span(), message.to_string()))
        }
    }

    fn consume_with_help(
        &mut self,
        token_type: TokenType,
        message: &str,
        help: String,
    ) -> Result<&Token, ScriptError> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(ScriptError::syntax_with_help(
                self.error_span(),
                message.to_string(),
                help,
            ))
        }
    }

    /// At EOF the error points just past the last real token instead of at
    /// the zero-width EOF marker.
    fn error_span(&self) -> Span {
        if self.is_at_end() && self.current > 0 {
            Span::single(self.tokens[self.current - 1].span.end)
        } else {
            self.peek().span
        }
    }
}

fn lvalue(expr: Expr, message: &str) -> Result<AssignTarget, ScriptError> {
    match expr {
        Expr::Variable { name, span } => Ok(AssignTarget::Variable { name, span }),
        Expr::Member {
            object,
            property,
            span,
        } => Ok(AssignTarget::Member {
            object,
            property,
            span,
        }),
        Expr::Index {
            object,
            index,
            span,
        } => Ok(AssignTarget::Index {
            object,
            index,
            span,
        }),
        other => Err(ScriptError::syntax(other.span(), message.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).scan_tokens().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> ScriptError {
        let tokens = Lexer::new(source).scan_tokens().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    fn first_expr(source: &str) -> Expr {
        match parse(source).statements.into_iter().next().unwrap() {
            Stmt::Expression { expr, .. } => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parses_declarations() {
        let program = parse("let x = 1; const y = 2\nvar z;");
        assert_eq!(program.statements.len(), 3);
        assert!(matches!(
            &program.statements[0],
            Stmt::Declaration { name, constant: false, initializer: Some(_), .. } if name == "x"
        ));
        assert!(matches!(
            &program.statements[1],
            Stmt::Declaration { constant: true, .. }
        ));
        assert!(matches!(
            &program.statements[2],
            Stmt::Declaration { initializer: None, .. }
        ));
    }

    #[test]
    fn const_requires_initializer() {
        let err = parse_err("const x;");
        assert!(err.message.contains("Missing initializer"));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = first_expr("1 + 2 * 3");
        match expr {
            Expr::Binary {
                operator, right, ..
            } => {
                assert_eq!(operator, BinaryOp::Add);
                assert!(matches!(
                    *right,
                    Expr::Binary {
                        operator: BinaryOp::Multiply,
                        ..
                    }
                ));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn logical_operators_nest_by_precedence() {
        let expr = first_expr("a === b || c && d");
        match expr {
            Expr::Logical {
                operator: LogicalOp::Or,
                left,
                right,
                ..
            } => {
                assert!(matches!(
                    *left,
                    Expr::Binary {
                        operator: BinaryOp::Equal,
                        ..
                    }
                ));
                assert!(matches!(
                    *right,
                    Expr::Logical {
                        operator: LogicalOp::And,
                        ..
                    }
                ));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn loose_equality_aliases_to_strict() {
        assert!(matches!(
            first_expr("a == b"),
            Expr::Binary {
                operator: BinaryOp::Equal,
                ..
            }
        ));
        assert!(matches!(
            first_expr("a != b"),
            Expr::Binary {
                operator: BinaryOp::NotEqual,
                ..
            }
        ));
    }

    #[test]
    fn assignment_is_right_associative() {
        let expr = first_expr("a = b = 1");
        match expr {
            Expr::Assign { value, .. } => {
                assert!(matches!(*value, Expr::Assign { .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn compound_assignment_carries_operator() {
        assert!(matches!(
            first_expr("x += 2"),
            Expr::Assign {
                op: AssignOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn literal_is_not_an_assignment_target() {
        let err = parse_err("1 = 2");
        assert!(err.message.contains("Invalid assignment target"));
    }

    #[test]
    fn update_expressions() {
        assert!(matches!(
            first_expr("i++"),
            Expr::Update {
                increment: true,
                prefix: false,
                ..
            }
        ));
        assert!(matches!(
            first_expr("--j"),
            Expr::Update {
                increment: false,
                prefix: true,
                ..
            }
        ));
    }

    #[test]
    fn call_member_index_chain() {
        let expr = first_expr("a.b[0](1).c");
        match expr {
            Expr::Member { object, property, .. } => {
                assert_eq!(property, "c");
                assert!(matches!(*object, Expr::Call { .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn new_expression_binds_before_trailing_call() {
        let expr = first_expr("new Error(\"x\")");
        assert!(matches!(&expr, Expr::New { args, .. } if args.len() == 1));

        let expr = first_expr("new Thing().describe()");
        match expr {
            Expr::Call { callee, .. } => {
                assert!(matches!(*callee, Expr::Member { .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn brace_at_statement_level_is_a_block() {
        let program = parse("{ let a = 1 }");
        assert!(matches!(&program.statements[0], Stmt::Block { statements, .. } if statements.len() == 1));
    }

    #[test]
    fn object_literal_with_shorthand_and_string_key() {
        let expr = first_expr("x = { a: 1, b, \"c d\": 2 }");
        match expr {
            Expr::Assign { value, .. } => match *value {
                Expr::Object { pairs, .. } => {
                    assert_eq!(pairs.len(), 3);
                    assert_eq!(pairs[1].0, "b");
                    assert!(matches!(&pairs[1].1, Expr::Variable { name, .. } if name == "b"));
                    assert_eq!(pairs[2].0, "c d");
                }
                other => panic!("unexpected shape: {:?}", other),
            },
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn array_literal_allows_trailing_comma() {
        assert!(matches!(
            first_expr("[1, 2, 3,]"),
            Expr::Array { elements, .. } if elements.len() == 3
        ));
    }

    #[test]
    fn arrow_functions() {
        let expr = first_expr("x => x + 1");
        match expr {
            Expr::Function {
                name, params, body, ..
            } => {
                assert!(name.is_none());
                assert_eq!(params, vec!["x".to_string()]);
                assert!(matches!(&body[0], Stmt::Return { value: Some(_), .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }

        assert!(matches!(
            first_expr("(a, b) => { return a; }"),
            Expr::Function { params, .. } if params.len() == 2
        ));
        assert!(matches!(
            first_expr("() => 1"),
            Expr::Function { params, .. } if params.is_empty()
        ));
    }

    #[test]
    fn grouping_is_not_mistaken_for_arrow_params() {
        let expr = first_expr("(1 + 2) * 3");
        assert!(matches!(
            expr,
            Expr::Binary { left, .. } if matches!(*left, Expr::Grouping { .. })
        ));
    }

    #[test]
    fn immediately_invoked_arrow() {
        let expr = first_expr("(x => x)(1)");
        match expr {
            Expr::Call { callee, args, .. } => {
                assert_eq!(args.len(), 1);
                assert!(matches!(
                    *callee,
                    Expr::Grouping { expr, .. } if matches!(*expr, Expr::Function { .. })
                ));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn template_parts_and_absolute_spans() {
        let expr = first_expr("`a ${x} b`");
        match expr {
            Expr::Template { parts, .. } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[0], TemplatePart::Text(t) if t == "a "));
                match &parts[1] {
                    TemplatePart::Expr(Expr::Variable { name, span }) => {
                        assert_eq!(name, "x");
                        assert_eq!(span.start, 5);
                    }
                    other => panic!("unexpected part: {:?}", other),
                }
                assert!(matches!(&parts[2], TemplatePart::Text(t) if t == " b"));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn template_escapes_decode_in_text_parts() {
        let expr = first_expr(r"`a\nb`");
        assert!(matches!(
            expr,
            Expr::Template { parts, .. } if matches!(&parts[0], TemplatePart::Text(t) if t == "a\nb")
        ));
    }

    #[test]
    fn unterminated_interpolation_errors() {
        let err = parse_err("`broken ${x`");
        assert!(err.message.contains("Unterminated '${'"));
    }

    #[test]
    fn classic_for_loop_shapes() {
        let program = parse("for (let i = 0; i < 3; i++) {}");
        match &program.statements[0] {
            Stmt::For {
                initializer,
                condition,
                increment,
                ..
            } => {
                assert!(initializer.is_some());
                assert!(condition.is_some());
                assert!(increment.is_some());
            }
            other => panic!("unexpected shape: {:?}", other),
        }

        let program = parse("for (;;) ;");
        match &program.statements[0] {
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                assert!(initializer.is_none());
                assert!(condition.is_none());
                assert!(increment.is_none());
                assert!(matches!(&**body, Stmt::Block { statements, .. } if statements.is_empty()));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn function_declaration_versus_expression() {
        let program = parse("function f() {}\nlet g = function() {};");
        assert!(matches!(&program.statements[0], Stmt::Function { name, .. } if name == "f"));
        assert!(matches!(
            &program.statements[1],
            Stmt::Declaration { initializer: Some(Expr::Function { name: None, .. }), .. }
        ));
    }

    #[test]
    fn if_else_attaches_to_nearest() {
        let program = parse("if (a) b; else c;");
        assert!(matches!(
            &program.statements[0],
            Stmt::If { else_branch: Some(_), .. }
        ));
    }

    #[test]
    fn typeof_parses_as_unary() {
        assert!(matches!(
            first_expr("typeof x"),
            Expr::Unary {
                operator: UnaryOp::TypeOf,
                ..
            }
        ));
    }

    #[test]
    fn throw_statement_wraps_expression() {
        let program = parse("throw new Error(\"boom\")");
        assert!(matches!(
            &program.statements[0],
            Stmt::Throw { value: Expr::New { .. }, .. }
        ));
    }

    #[test]
    fn missing_close_paren_carries_help() {
        let err = parse_err("f(1, 2");
        assert!(err.message.contains("Expected ')'"));
        assert!(err.help.is_some());
    }

    #[test]
    fn return_with_and_without_value() {
        let program = parse("function f() { return 1; }\nfunction g() { return }");
        match &program.statements[0] {
            Stmt::Function { body, .. } => {
                assert!(matches!(&body[0], Stmt::Return { value: Some(_), .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
        match &program.statements[1] {
            Stmt::Function { body, .. } => {
                assert!(matches!(&body[0], Stmt::Return { value: None, .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn nesting_inside_the_bound_parses() {
        let parens = format!("{}1{}", "(".repeat(150), ")".repeat(150));
        parse(&parens);
        let blocks = format!("{}{}", "{ ".repeat(150), "} ".repeat(150));
        parse(&blocks);
    }

    #[test]
    fn expression_nesting_is_bounded() {
        let source = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = parse_err(&source);
        assert!(err.message.contains("Expression nesting too deep"));
    }

    #[test]
    fn statement_nesting_is_bounded() {
        let source = format!("{}{}", "{ ".repeat(50_000), "} ".repeat(50_000));
        let err = parse_err(&source);
        assert!(err.message.contains("Statement nesting too deep"));
    }

    #[test]
    fn unary_chains_are_bounded() {
        let source = format!("{}1", "!".repeat(50_000));
        let err = parse_err(&source);
        assert!(err.message.contains("Expression nesting too deep"));
    }

    #[test]
    fn template_nesting_shares_the_bound() {
        let mut source = String::from("1");
        for _ in 0..300 {
            source = format!("`${{{}}}`", source);
        }
        let err = parse_err(&source);
        assert!(err.message.contains("Expression nesting too deep"));
    }
}
