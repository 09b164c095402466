use crate::ast::*;
use crate::error::Error;
use crate::lexer::{Lexer, Token, TokenType};

pub struct Parser;

impl Parser {
    /// Parses query text into an AST, or fails with a positioned syntax
    /// error. Parsing never partially succeeds.
    pub fn parse(input: &str) -> Result<Query, Error> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = TokenParser::new(tokens);
        let query = parser.parse_query()?;
        parser.expect_eof()?;
        Ok(query)
    }
}

struct TokenParser {
    tokens: Vec<Token>,
    position: usize,
}

impl TokenParser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn parse_query(&mut self) -> Result<Query, Error> {
        let mut clauses = self.parse_single_query_clauses()?;

        while self.match_token(&TokenType::Union) {
            let all = self.match_token(&TokenType::All);
            let right_clauses = self.parse_single_query_clauses()?;
            if right_clauses.is_empty() {
                return Err(self.unexpected("a query after UNION"));
            }
            clauses.push(Clause::Union(UnionClause {
                all,
                query: Query {
                    clauses: right_clauses,
                },
            }));
        }

        Ok(Query { clauses })
    }

    fn parse_single_query_clauses(&mut self) -> Result<Vec<Clause>, Error> {
        let mut clauses = Vec::new();
        while !self.is_at_end() && !self.check(&TokenType::Union) {
            if let Some(clause) = self.parse_clause()? {
                clauses.push(clause);
            } else {
                break;
            }
        }
        Ok(clauses)
    }

    fn parse_clause(&mut self) -> Result<Option<Clause>, Error> {
        // Trailing semicolons are allowed and ignored.
        if self.match_token(&TokenType::Semicolon) {
            return Ok(None);
        }

        if self.match_token(&TokenType::Optional) {
            self.consume(&TokenType::Match, "MATCH after OPTIONAL")?;
            return Ok(Some(Clause::Match(self.parse_match(true)?)));
        }
        if self.match_token(&TokenType::Match) {
            return Ok(Some(Clause::Match(self.parse_match(false)?)));
        }
        if self.match_token(&TokenType::Create) {
            return Ok(Some(Clause::Create(self.parse_create()?)));
        }
        if self.match_token(&TokenType::Where) {
            return Ok(Some(Clause::Where(WhereClause {
                expression: self.parse_expression()?,
            })));
        }
        if self.match_token(&TokenType::Return) {
            return Ok(Some(Clause::Return(self.parse_return()?)));
        }
        if self.match_token(&TokenType::Set) {
            return Ok(Some(Clause::Set(self.parse_set()?)));
        }
        if self.check(&TokenType::Detach) || self.check(&TokenType::Delete) {
            return Ok(Some(Clause::Delete(self.parse_delete()?)));
        }

        if !self.is_at_end() {
            return Err(self.unexpected("a clause (MATCH, CREATE, WHERE, RETURN, SET, DELETE)"));
        }
        Ok(None)
    }

    fn parse_match(&mut self, optional: bool) -> Result<MatchClause, Error> {
        let mut patterns = Vec::new();
        loop {
            patterns.push(self.parse_pattern()?);
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        Ok(MatchClause { optional, patterns })
    }

    fn parse_create(&mut self) -> Result<CreateClause, Error> {
        let mut patterns = Vec::new();
        loop {
            patterns.push(self.parse_pattern()?);
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        Ok(CreateClause { patterns })
    }

    fn parse_return(&mut self) -> Result<ReturnClause, Error> {
        let distinct = self.match_token(&TokenType::Distinct);
        let mut items = Vec::new();

        loop {
            items.push(self.parse_return_item()?);
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }

        let order_by = if self.match_token(&TokenType::Order) {
            self.consume(&TokenType::By, "BY after ORDER")?;
            Some(self.parse_order_by()?)
        } else {
            None
        };

        let skip = if self.match_token(&TokenType::Skip) {
            Some(self.parse_unsigned("SKIP")?)
        } else {
            None
        };

        let limit = if self.match_token(&TokenType::Limit) {
            Some(self.parse_unsigned("LIMIT")?)
        } else {
            None
        };

        Ok(ReturnClause {
            distinct,
            items,
            order_by,
            skip,
            limit,
        })
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem, Error> {
        let expression = self.parse_expression()?;
        let alias = if self.match_token(&TokenType::As) {
            Some(self.parse_identifier("alias after AS")?)
        } else if self.peek_is_identifier() {
            Some(self.parse_identifier("alias")?)
        } else {
            None
        };
        Ok(ReturnItem { expression, alias })
    }

    fn parse_order_by(&mut self) -> Result<OrderByClause, Error> {
        let mut items = Vec::new();
        loop {
            let expression = self.parse_expression()?;
            let direction = if self.match_token(&TokenType::Asc) {
                SortOrder::Ascending
            } else if self.match_token(&TokenType::Desc) {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            };
            items.push(OrderByItem {
                expression,
                direction,
            });
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        Ok(OrderByClause { items })
    }

    fn parse_set(&mut self) -> Result<SetClause, Error> {
        let mut items = Vec::new();
        loop {
            let target = self.parse_property_access()?;
            self.consume(&TokenType::Equals, "'=' in SET clause")?;
            let value = self.parse_expression()?;
            items.push(SetItem { target, value });
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        Ok(SetClause { items })
    }

    fn parse_delete(&mut self) -> Result<DeleteClause, Error> {
        let detach = self.match_token(&TokenType::Detach);
        self.consume(&TokenType::Delete, "DELETE")?;

        let mut expressions = Vec::new();
        loop {
            expressions.push(self.parse_expression()?);
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        Ok(DeleteClause {
            detach,
            expressions,
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, Error> {
        // Named path: `p = (a)-[:R]->(b)`.
        let variable = if self.peek_is_identifier()
            && self.peek_next().token_type == TokenType::Equals
        {
            let name = self.parse_identifier("path variable")?;
            self.advance(); // '='
            Some(name)
        } else {
            None
        };

        let mut elements = Vec::new();
        elements.push(PathElement::Node(self.parse_node_pattern()?));

        while self.check_relationship_start() {
            elements.push(PathElement::Relationship(
                self.parse_relationship_pattern()?,
            ));
            elements.push(PathElement::Node(self.parse_node_pattern()?));
        }
        Ok(Pattern { variable, elements })
    }

    fn check_relationship_start(&self) -> bool {
        matches!(
            self.peek().token_type,
            TokenType::LeftArrow | TokenType::Dash
        )
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern, Error> {
        self.consume(&TokenType::LeftParen, "'(' to start a node pattern")?;
        let variable = if self.peek_is_identifier() {
            Some(self.parse_identifier("node variable")?)
        } else {
            None
        };

        let mut labels = Vec::new();
        while self.match_token(&TokenType::Colon) {
            labels.push(self.parse_identifier("label name")?);
        }

        let properties = if self.check(&TokenType::LeftBrace) {
            self.parse_property_map()?
        } else {
            Vec::new()
        };

        self.consume(&TokenType::RightParen, "')' to close the node pattern")?;
        Ok(NodePattern {
            variable,
            labels,
            properties,
        })
    }

    fn parse_relationship_pattern(&mut self) -> Result<RelationshipPattern, Error> {
        let mut direction = if self.match_token(&TokenType::LeftArrow) {
            PatternDirection::RightToLeft
        } else if self.match_token(&TokenType::Dash) {
            PatternDirection::Undirected
        } else {
            return Err(self.unexpected("a relationship pattern"));
        };

        let mut variable = None;
        let mut types = Vec::new();
        let mut properties = Vec::new();
        let mut length = None;

        if self.match_token(&TokenType::LeftBracket) {
            if self.peek_is_identifier() {
                variable = Some(self.parse_identifier("relationship variable")?);
            }

            if self.match_token(&TokenType::Colon) {
                types.push(self.parse_identifier("relationship type")?);
                while self.match_token(&TokenType::Pipe) {
                    // Accept both `:A|B` and `:A|:B`.
                    self.match_token(&TokenType::Colon);
                    types.push(self.parse_identifier("relationship type")?);
                }
            }

            if self.match_token(&TokenType::Asterisk) {
                length = Some(self.parse_var_length()?);
            }

            if self.check(&TokenType::LeftBrace) {
                properties = self.parse_property_map()?;
            }

            self.consume(&TokenType::RightBracket, "']' to close the relationship")?;
        }

        if self.match_token(&TokenType::RightArrow) {
            if direction == PatternDirection::RightToLeft {
                return Err(self.unexpected("a single-direction relationship, not '<- ->'"));
            }
            direction = PatternDirection::LeftToRight;
        } else if self.match_token(&TokenType::Dash) {
            // `<-[..]-` keeps RightToLeft; `-[..]-` stays undirected.
        } else if direction == PatternDirection::RightToLeft {
            self.consume(&TokenType::Dash, "'-' after '<-[..]'")?;
        }

        Ok(RelationshipPattern {
            variable,
            types,
            direction,
            properties,
            length,
        })
    }

    fn parse_var_length(&mut self) -> Result<VarLength, Error> {
        // Forms after '*': nothing, `n`, `n..`, `n..m`, `..m`.
        let min = if let TokenType::Integer(n) = self.peek().token_type {
            self.advance();
            Some(self.as_u32(n, "variable-length bound")?)
        } else {
            None
        };

        if self.match_token(&TokenType::RangeDots) {
            let max = if let TokenType::Integer(n) = self.peek().token_type {
                self.advance();
                Some(self.as_u32(n, "variable-length bound")?)
            } else {
                None
            };
            Ok(VarLength { min, max })
        } else {
            // `*n` means exactly n; bare `*` is unbounded.
            Ok(VarLength { min, max: min })
        }
    }

    fn parse_property_map(&mut self) -> Result<Vec<(String, Expression)>, Error> {
        self.consume(&TokenType::LeftBrace, "'{' to start a property map")?;
        let mut properties = Vec::new();

        while !self.check(&TokenType::RightBrace) {
            let key = self.parse_identifier("property key")?;
            self.consume(&TokenType::Colon, "':' in property map")?;
            let value = self.parse_expression()?;
            properties.push((key, value));

            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }

        self.consume(&TokenType::RightBrace, "'}' to close the property map")?;
        Ok(properties)
    }

    fn parse_property_access(&mut self) -> Result<PropertyAccess, Error> {
        let variable = self.parse_identifier("variable")?;
        self.consume(&TokenType::Dot, "'.' in property access")?;
        let property = self.parse_identifier("property name")?;
        Ok(PropertyAccess { variable, property })
    }

    // Expression grammar, loosest binding first:
    // OR < XOR < AND < NOT < comparison < +- < */% < ^ < unary < postfix
    fn parse_expression(&mut self) -> Result<Expression, Error> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_xor()?;
        while self.match_token(&TokenType::Or) {
            let right = self.parse_xor()?;
            left = binary(left, BinaryOperator::Or, right);
        }
        Ok(left)
    }

    fn parse_xor(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_and()?;
        while self.match_token(&TokenType::Xor) {
            let right = self.parse_and()?;
            left = binary(left, BinaryOperator::Xor, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_not()?;
        while self.match_token(&TokenType::And) {
            let right = self.parse_not()?;
            left = binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, Error> {
        if self.match_token(&TokenType::Not) {
            let operand = self.parse_not()?;
            return Ok(Expression::Unary(Box::new(UnaryExpression {
                operator: UnaryOperator::Not,
                operand,
            })));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_additive()?;

        loop {
            // IS NULL / IS NOT NULL postfix.
            if self.match_token(&TokenType::Is) {
                let negated = self.match_token(&TokenType::Not);
                self.consume(&TokenType::Null, "NULL after IS")?;
                left = Expression::Unary(Box::new(UnaryExpression {
                    operator: if negated {
                        UnaryOperator::IsNotNull
                    } else {
                        UnaryOperator::IsNull
                    },
                    operand: left,
                }));
                continue;
            }

            let operator = if self.match_token(&TokenType::Equals) {
                BinaryOperator::Equals
            } else if self.match_token(&TokenType::NotEquals) {
                BinaryOperator::NotEquals
            } else if self.match_token(&TokenType::LessEqual) {
                BinaryOperator::LessEqual
            } else if self.match_token(&TokenType::GreaterEqual) {
                BinaryOperator::GreaterEqual
            } else if self.match_token(&TokenType::LessThan) {
                BinaryOperator::LessThan
            } else if self.match_token(&TokenType::GreaterThan) {
                BinaryOperator::GreaterThan
            } else if self.match_token(&TokenType::In) {
                BinaryOperator::In
            } else if self.match_token(&TokenType::Contains) {
                BinaryOperator::Contains
            } else if self.match_token(&TokenType::Starts) {
                self.consume(&TokenType::With, "WITH after STARTS")?;
                BinaryOperator::StartsWith
            } else if self.match_token(&TokenType::Ends) {
                self.consume(&TokenType::With, "WITH after ENDS")?;
                BinaryOperator::EndsWith
            } else {
                break;
            };

            let right = self.parse_additive()?;
            left = binary(left, operator, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let operator = if self.match_token(&TokenType::Plus) {
                BinaryOperator::Add
            } else if self.match_token(&TokenType::Dash) {
                BinaryOperator::Subtract
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = binary(left, operator, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_power()?;
        loop {
            let operator = if self.match_token(&TokenType::Asterisk) {
                BinaryOperator::Multiply
            } else if self.match_token(&TokenType::Divide) {
                BinaryOperator::Divide
            } else if self.match_token(&TokenType::Modulo) {
                BinaryOperator::Modulo
            } else {
                break;
            };
            let right = self.parse_power()?;
            left = binary(left, operator, right);
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_unary()?;
        while self.match_token(&TokenType::Power) {
            let right = self.parse_unary()?;
            left = binary(left, BinaryOperator::Power, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, Error> {
        if self.match_token(&TokenType::Dash) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary(Box::new(UnaryExpression {
                operator: UnaryOperator::Negate,
                operand,
            })));
        }
        if self.match_token(&TokenType::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, Error> {
        match self.peek().token_type.clone() {
            TokenType::Integer(n) => {
                self.advance();
                Ok(Expression::Literal(Literal::Integer(n)))
            }
            TokenType::Float(f) => {
                self.advance();
                Ok(Expression::Literal(Literal::Float(f)))
            }
            TokenType::String(s) => {
                self.advance();
                Ok(Expression::Literal(Literal::String(s)))
            }
            TokenType::Boolean(b) => {
                self.advance();
                Ok(Expression::Literal(Literal::Boolean(b)))
            }
            TokenType::Null => {
                self.advance();
                Ok(Expression::Literal(Literal::Null))
            }
            TokenType::Parameter(name) => {
                self.advance();
                Ok(Expression::Parameter(name))
            }
            TokenType::Case => {
                self.advance();
                self.parse_case()
            }
            TokenType::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(&TokenType::RightParen, "')' to close the expression")?;
                Ok(inner)
            }
            TokenType::LeftBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenType::RightBracket) {
                    items.push(self.parse_expression()?);
                    if !self.match_token(&TokenType::Comma) {
                        break;
                    }
                }
                self.consume(&TokenType::RightBracket, "']' to close the list")?;
                Ok(Expression::List(items))
            }
            TokenType::LeftBrace => {
                let entries = self.parse_property_map()?;
                Ok(Expression::Map(entries))
            }
            TokenType::Identifier(name) => {
                self.advance();
                if self.check(&TokenType::LeftParen) {
                    return self.parse_function_call(name);
                }
                if self.match_token(&TokenType::Dot) {
                    let property = self.parse_identifier("property name")?;
                    return Ok(Expression::Property(PropertyAccess {
                        variable: name,
                        property,
                    }));
                }
                Ok(Expression::Variable(name))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_function_call(&mut self, name: String) -> Result<Expression, Error> {
        self.consume(&TokenType::LeftParen, "'(' after function name")?;
        let distinct = self.match_token(&TokenType::Distinct);

        let mut args = Vec::new();
        if self.match_token(&TokenType::Asterisk) {
            args.push(Expression::Star);
        } else {
            while !self.check(&TokenType::RightParen) {
                args.push(self.parse_expression()?);
                if !self.match_token(&TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenType::RightParen, "')' to close the argument list")?;
        Ok(Expression::Function(FunctionCall {
            name,
            distinct,
            args,
        }))
    }

    fn parse_case(&mut self) -> Result<Expression, Error> {
        let subject = if self.check(&TokenType::When) {
            None
        } else {
            Some(self.parse_expression()?)
        };

        let mut whens = Vec::new();
        while self.match_token(&TokenType::When) {
            let condition = self.parse_expression()?;
            self.consume(&TokenType::Then, "THEN after WHEN")?;
            let result = self.parse_expression()?;
            whens.push((condition, result));
        }
        if whens.is_empty() {
            return Err(self.unexpected("at least one WHEN in CASE"));
        }

        let else_expression = if self.match_token(&TokenType::Else) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume(&TokenType::End, "END to close CASE")?;

        Ok(Expression::Case(Box::new(CaseExpression {
            subject,
            whens,
            else_expression,
        })))
    }

    fn parse_unsigned(&mut self, ctx: &str) -> Result<u64, Error> {
        match self.peek().token_type {
            TokenType::Integer(n) if n >= 0 => {
                self.advance();
                Ok(n as u64)
            }
            _ => Err(self.unexpected(&format!("a non-negative integer after {ctx}"))),
        }
    }

    fn as_u32(&self, n: i64, ctx: &str) -> Result<u32, Error> {
        u32::try_from(n).map_err(|_| self.unexpected(&format!("a small non-negative {ctx}")))
    }

    fn parse_identifier(&mut self, ctx: &str) -> Result<String, Error> {
        match self.peek().token_type.clone() {
            TokenType::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(ctx)),
        }
    }

    fn peek_is_identifier(&self) -> bool {
        matches!(self.peek().token_type, TokenType::Identifier(_))
    }

    fn match_token(&mut self, token_type: &TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, token_type: &TokenType) -> bool {
        std::mem::discriminant(token_type) == std::mem::discriminant(&self.peek().token_type)
    }

    fn consume(&mut self, token_type: &TokenType, expected: &str) -> Result<(), Error> {
        if self.check(token_type) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_eof(&self) -> Result<(), Error> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of query"))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.peek();
        Error::syntax(
            token.line,
            token.column,
            expected,
            token.token_type.describe(),
        )
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn peek_next(&self) -> &Token {
        let next = (self.position + 1).min(self.tokens.len() - 1);
        &self.tokens[next]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.position += 1;
        }
        &self.tokens[self.position - 1]
    }
}

fn binary(left: Expression, operator: BinaryOperator, right: Expression) -> Expression {
    Expression::Binary(Box::new(BinaryExpression {
        left,
        operator,
        right,
    }))
}
