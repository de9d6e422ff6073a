//! A textual format for [Term]s, value maps, and [Computation]s.
//!
//! Includes a parser ([parse_term]) and serializer ([serialize_term]) for [Term]s.
//!
//! Includes a parser ([parse_value_map]) and serializer ([serialize_value_map]) for value maps.
//!
//! Includes a parser ([parse_computation]) and serializer ([serialize_computation]) for
//! [Computation]s.
//!
//! * IR Textual format
//!   * It's s-expressions.
//!   * `N`: natural number
//!   * `I`: integer (arbitrary-precision)
//!   * `X`: identifier
//!     * regex: `[^()0-9#; \t\n\f][^(); \t\n\f#]*`
//!   * Computation `C`: `(computation M P? T*)`
//!     * Metadata `M`: `(metadata (inputs INPUT*))`
//!       * INPUT is `(X S VIS?)`
//!       * VIS is `public`, `private`, `(committed N)`, `(round N)`, or `(random N)`.
//!         Omitted means private.
//!     * Precompute `P`: `(precompute INPUTS OUTPUTS TUPLE_TERM)`
//!       * INPUTS is `((X1 S1) .. (Xn Sn))`
//!       * OUTPUTS is `((X1 S1) .. (Xn Sn))`
//!       * TUPLE_TERM is a tuple of the same arity as the output
//!     * each `T` is an assertion
//!   * Sort `S`:
//!     * `bool`
//!     * `(bv N)`
//!     * `(mod I)`
//!     * `(tuple S1 ... Sn)`
//!     * `(array Sk Sv N)`
//!   * Value `V`:
//!     * boolean: `true`, `false`
//!     * bit-vector: `#xFFFF...`, `#bBBBB...`
//!     * field literal: `#fDD`, `#fxHH`, `#fDDmDD`, or `#fxHHmDD`.
//!       * Without `m`, an ambient modulus must be set.
//!     * tuple: `(#t V1 ... Vn)`
//!     * array: `(#a Sk V N ((Vk1 Vv1) ... (Vkn Vvn)))`
//!     * list: `(#l Sk (V1 ... Vn))`
//!       * gives an array of length n, with increasing keys for the values
//!   * Term `T`:
//!     * value: `V`
//!     * let: `(let ((X1 T1) ... (Xn Tn)) T)`
//!     * declare: `(declare ((X1 S1) ... (Xn Sn)) T)`
//!     * set_default_modulus: `(set_default_modulus I T)`
//!       * within term T, I will be the default field modulus
//!     * operator: `(O T1 ... TN)`
//!   * Operator `O`:
//!     * Plain operators: (`bvmul`, `and`, `+`, ...)
//!     * Composite operators: `(field N)`, `(update N)`, `(sext N)`, `(uext N)`, `(bit N)`,
//!       `(extract N N)`, `(pf2bv N)`, `(bv2pf I)`, `(const-array S N)`

use circ_fields::{FieldT, FieldV};

use logos::Logos;

use fxhash::FxHashMap as HashMap;

mod lex;

use lex::Token;
use std::fmt::{self, Debug, Display, Formatter, Write};
use std::str::{from_utf8, FromStr};
use std::sync::Arc;

use super::*;
use crate::error::{Error, Result};

/// A token tree, LISP-style.
///
/// It can be "interpreted" into an IR term
#[derive(PartialEq, Eq)]
enum TokTree<'src> {
    Leaf(Token, &'src [u8]),
    List(Vec<TokTree<'src>>),
}

use TokTree::*;

impl<'src> Display for TokTree<'src> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Leaf(_, l) => write!(f, "{}", String::from_utf8_lossy(l)),
            List(tts) => {
                let mut first = true;
                write!(f, "(")?;
                for tt in tts {
                    if first {
                        first = false
                    } else {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", tt)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl<'src> Debug for TokTree<'src> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Leaf(_, l) => write!(f, "{}", String::from_utf8_lossy(l)),
            List(tts) => f.debug_list().entries(tts).finish(),
        }
    }
}

fn perr<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::Parse(msg.into()))
}

/// Parse a token tree.
fn parse_tok_tree(bytes: &[u8]) -> Result<TokTree> {
    let mut stack: Vec<Vec<TokTree>> = vec![vec![]];
    let lex = Token::lexer(bytes).spanned();
    for (t, s) in lex {
        match t {
            Token::Error => {
                return perr(format!(
                    "could not tokenize: {}",
                    String::from_utf8_lossy(&bytes[s])
                ))
            }
            Token::Open => {
                stack.push(vec![]);
            }
            Token::Close => {
                if stack.len() < 2 {
                    return perr("hanging closing paren");
                }
                let l = TokTree::List(stack.pop().unwrap_or_default());
                if let Some(top) = stack.last_mut() {
                    top.push(l);
                }
            }
            _ => {
                if let Some(top) = stack.last_mut() {
                    top.push(TokTree::Leaf(t, &bytes[s]));
                }
            }
        }
    }
    if stack.len() != 1 {
        return perr(format!("there are {} unclosed parens", stack.len() - 1));
    }
    let mut top = stack.pop().unwrap_or_default();
    match top.len() {
        0 => perr("empty parse"),
        1 => Ok(top.pop().unwrap_or(List(Vec::new()))),
        _ => perr("multiple top-level expressions"),
    }
}

struct IrInterp<'src> {
    /// A map from an identifier to a stack of bindings.
    /// The stack is there for scoping.
    bindings: HashMap<&'src [u8], Vec<Term>>,
    /// The moduli seen so far, sorted, so that equal moduli share an allocation
    int_arcs: Vec<Arc<Integer>>,
    /// The current default field modulus, if any
    modulus_stack: Vec<Arc<Integer>>,
    /// Whether we should un-bind out-of-scope ids
    do_unbinds: bool,
}

enum CtrlOp {
    Let,
    Declare,
    TupleValue,
    ArrayValue,
    ListValue,
    SetDefaultModulus,
}

/// The head of a list term: a real operator, or a binding/literal form
enum Head {
    Op(Op),
    Ctrl(CtrlOp),
}

impl<'src> IrInterp<'src> {
    fn new() -> Self {
        Self {
            bindings: HashMap::default(),
            int_arcs: Vec::new(),
            modulus_stack: Vec::new(),
            do_unbinds: true,
        }
    }

    /// Takes bindings in order bound, and unbinds
    fn unbind(&mut self, bindings: Vec<&'src [u8]>) {
        if self.do_unbinds {
            for b in bindings {
                if let Some(stack) = self.bindings.get_mut(b) {
                    stack.pop();
                }
            }
        }
    }

    fn bind(&mut self, key: &'src [u8], value: Term) {
        self.bindings.entry(key).or_default().push(value)
    }

    fn get_binding(&self, key: &'src [u8]) -> Result<&Term> {
        self.bindings
            .get(key)
            .and_then(|v| v.last())
            .ok_or_else(|| Error::Parse(format!("unknown binding {}", String::from_utf8_lossy(key))))
    }

    fn op(&mut self, tt: &TokTree<'src>) -> Result<Head> {
        use Token::Ident;
        let op = match tt {
            Leaf(Ident, b"let") => return Ok(Head::Ctrl(CtrlOp::Let)),
            Leaf(Ident, b"declare") => return Ok(Head::Ctrl(CtrlOp::Declare)),
            Leaf(Ident, b"#t") => return Ok(Head::Ctrl(CtrlOp::TupleValue)),
            Leaf(Ident, b"#a") => return Ok(Head::Ctrl(CtrlOp::ArrayValue)),
            Leaf(Ident, b"#l") => return Ok(Head::Ctrl(CtrlOp::ListValue)),
            Leaf(Ident, b"set_default_modulus") => {
                return Ok(Head::Ctrl(CtrlOp::SetDefaultModulus))
            }
            Leaf(Ident, b"ite") => Op::Ite,
            Leaf(Ident, b"=") => Op::Eq,
            Leaf(Ident, b"bvsub") => Op::BvBinOp(BvBinOp::Sub),
            Leaf(Ident, b"bvashr") => Op::BvBinOp(BvBinOp::Ashr),
            Leaf(Ident, b"bvlshr") => Op::BvBinOp(BvBinOp::Lshr),
            Leaf(Ident, b"bvshl") => Op::BvBinOp(BvBinOp::Shl),
            Leaf(Ident, b"bvudiv") => Op::BvBinOp(BvBinOp::Udiv),
            Leaf(Ident, b"bvurem") => Op::BvBinOp(BvBinOp::Urem),
            Leaf(Ident, b"bvsge") => Op::BvBinPred(BvBinPred::Sge),
            Leaf(Ident, b"bvsgt") => Op::BvBinPred(BvBinPred::Sgt),
            Leaf(Ident, b"bvsle") => Op::BvBinPred(BvBinPred::Sle),
            Leaf(Ident, b"bvslt") => Op::BvBinPred(BvBinPred::Slt),
            Leaf(Ident, b"bvuge") => Op::BvBinPred(BvBinPred::Uge),
            Leaf(Ident, b"bvugt") => Op::BvBinPred(BvBinPred::Ugt),
            Leaf(Ident, b"bvule") => Op::BvBinPred(BvBinPred::Ule),
            Leaf(Ident, b"bvult") => Op::BvBinPred(BvBinPred::Ult),
            Leaf(Ident, b"bvadd") => Op::BvNaryOp(BvNaryOp::Add),
            Leaf(Ident, b"bvmul") => Op::BvNaryOp(BvNaryOp::Mul),
            Leaf(Ident, b"bvxor") => Op::BvNaryOp(BvNaryOp::Xor),
            Leaf(Ident, b"bvand") => Op::BvNaryOp(BvNaryOp::And),
            Leaf(Ident, b"bvor") => Op::BvNaryOp(BvNaryOp::Or),
            Leaf(Ident, b"bvnot") => Op::BvUnOp(BvUnOp::Not),
            Leaf(Ident, b"bvneg") => Op::BvUnOp(BvUnOp::Neg),
            Leaf(Ident, b"bool2bv") => Op::BoolToBv,
            Leaf(Ident, b"concat") => Op::BvConcat,
            Leaf(Ident, b"=>") => Op::Implies,
            Leaf(Ident, b"not") => Op::Not,
            Leaf(Ident, b"xor") => Op::BoolNaryOp(BoolNaryOp::Xor),
            Leaf(Ident, b"and") => Op::BoolNaryOp(BoolNaryOp::And),
            Leaf(Ident, b"or") => Op::BoolNaryOp(BoolNaryOp::Or),
            Leaf(Ident, b"+") => Op::PfNaryOp(PfNaryOp::Add),
            Leaf(Ident, b"*") => Op::PfNaryOp(PfNaryOp::Mul),
            Leaf(Ident, b"pfrecip") => Op::PfUnOp(PfUnOp::Recip),
            Leaf(Ident, b"-") => Op::PfUnOp(PfUnOp::Neg),
            Leaf(Ident, b"select") => Op::Select,
            Leaf(Ident, b"store") => Op::Store,
            Leaf(Ident, b"tuple") => Op::Tuple,
            List(tts) => match &tts[..] {
                [Leaf(Ident, b"extract"), a, b] => Op::BvExtract(self.usize(a)?, self.usize(b)?),
                [Leaf(Ident, b"uext"), a] => Op::BvUext(self.usize(a)?),
                [Leaf(Ident, b"sext"), a] => Op::BvSext(self.usize(a)?),
                [Leaf(Ident, b"pf2bv"), a] => Op::PfToBv(self.usize(a)?),
                [Leaf(Ident, b"bit"), a] => Op::BvBit(self.usize(a)?),
                [Leaf(Ident, b"bv2pf"), a] => Op::UbvToPf(FieldT::from(self.int(a)?)),
                [Leaf(Ident, b"field"), a] => Op::Field(self.usize(a)?),
                [Leaf(Ident, b"update"), a] => Op::Update(self.usize(a)?),
                [Leaf(Ident, b"const-array"), k, n] => {
                    Op::ConstArray(self.sort(k)?, self.usize(n)?)
                }
                _ => return perr(format!("unknown operator: {}", tt)),
            },
            _ => return perr(format!("unknown operator: {}", tt)),
        };
        Ok(Head::Op(op))
    }

    fn value(&mut self, tt: &TokTree<'src>) -> Result<Value> {
        let t = self.term(tt)?;
        match &t.op {
            Op::Const(v) => Ok(v.clone()),
            _ => perr(format!("expected value, found term {}", t)),
        }
    }

    fn sort(&mut self, tt: &TokTree) -> Result<Sort> {
        use Token::Ident;
        match tt {
            Leaf(Ident, b"bool") => Ok(Sort::Bool),
            List(ls) => match &ls[..] {
                [Leaf(Ident, b"mod"), m] => Ok(Sort::Field(FieldT::from(self.int(m)?))),
                [Leaf(Ident, b"bv"), w] => Ok(Sort::BitVector(self.usize(w)?)),
                [Leaf(Ident, b"array"), k, v, s] => {
                    let k = self.sort(k)?;
                    if !k.is_scalar() {
                        return perr(format!("bad array key sort {}", k));
                    }
                    Ok(Sort::Array(Box::new(k), Box::new(self.sort(v)?), self.usize(s)?))
                }
                [Leaf(Ident, b"tuple"), rest @ ..] => Ok(Sort::Tuple(
                    rest.iter()
                        .map(|li| self.sort(li))
                        .collect::<Result<Vec<_>>>()?
                        .into(),
                )),
                _ => perr(format!("expected sort, found {}", tt)),
            },
            _ => perr(format!("expected sort, found {}", tt)),
        }
    }

    /// Parse this text as an integer, but check the ARC cache before creating a new one.
    fn parse_int(&mut self, s: &[u8]) -> Result<Arc<Integer>> {
        let i: Integer = Integer::parse(s)
            .map_err(|e| Error::Parse(format!("bad integer {}: {}", String::from_utf8_lossy(s), e)))?
            .into();
        Ok(match self.int_arcs.binary_search_by(|v| v.as_ref().cmp(&i)) {
            Ok(idx) => self.int_arcs[idx].clone(),
            Err(idx) => {
                let i = Arc::new(i);
                self.int_arcs.insert(idx, i.clone());
                i
            }
        })
    }

    fn int(&mut self, tt: &TokTree) -> Result<Arc<Integer>> {
        match tt {
            Leaf(Token::Int, s) => self.parse_int(s),
            _ => perr(format!("expected integer, got {}", tt)),
        }
    }

    fn usize(&self, tt: &TokTree) -> Result<usize> {
        match tt {
            Leaf(Token::Int, s) => from_utf8(s)
                .ok()
                .and_then(|s| usize::from_str(s).ok())
                .ok_or_else(|| Error::Parse(format!("expected natural number, got {}", tt))),
            _ => perr(format!("expected natural number, got {}", tt)),
        }
    }

    fn ident(&self, tt: &TokTree<'src>) -> Result<&'src [u8]> {
        match tt {
            Leaf(Token::Ident, i) => Ok(*i),
            _ => perr(format!("expected identifier, found {}", tt)),
        }
    }

    fn ident_string(&self, tt: &TokTree<'src>) -> Result<String> {
        let i = self.ident(tt)?;
        from_utf8(i)
            .map(|s| s.to_owned())
            .map_err(|_| Error::Parse(format!("identifier is not utf-8: {}", tt)))
    }

    fn unwrap_list<'a>(&self, tt: &'a TokTree<'src>, what: &str) -> Result<&'a [TokTree<'src>]> {
        match tt {
            List(tts) => Ok(tts.as_slice()),
            _ => perr(format!("expected {}, found non-list: {}", what, tt)),
        }
    }

    fn unwrap_prefix_list<'a>(
        &self,
        tt: &'a TokTree<'src>,
        prefix: &str,
    ) -> Result<&'a [TokTree<'src>]> {
        let tts = self.unwrap_list(tt, prefix)?;
        match tts.first() {
            Some(Leaf(Token::Ident, h)) if *h == prefix.as_bytes() => Ok(&tts[1..]),
            _ => perr(format!("expected list headed by '{}', found {}", prefix, tt)),
        }
    }

    /// Parse a list of `(name X)` pairs with `f` parsing each `X`.
    fn pair_list<T>(
        &mut self,
        tt: &TokTree<'src>,
        what: &str,
        mut f: impl FnMut(&mut Self, &'src [u8], &TokTree<'src>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let tts = self.unwrap_list(tt, what)?;
        let mut out = Vec::with_capacity(tts.len());
        for tti in tts {
            match tti {
                List(ls) => match &ls[..] {
                    [Leaf(Token::Ident, name), x] => out.push(f(self, name, x)?),
                    _ => return perr(format!("expected {}, found {}", what, tti)),
                },
                _ => return perr(format!("expected {}, found {}", what, tti)),
            }
        }
        Ok(out)
    }

    /// Parse lets, returning bindings, in-order.
    fn let_list(&mut self, tt: &TokTree<'src>) -> Result<Vec<&'src [u8]>> {
        self.pair_list(tt, "let binding", |this, name, s| {
            let t = this.term(s)?;
            this.bind(name, t);
            Ok(name)
        })
    }

    /// Parse declarations, returning bindings, in-order.
    fn decl_list(&mut self, tt: &TokTree<'src>) -> Result<Vec<&'src [u8]>> {
        self.pair_list(tt, "declaration", |this, name, s| {
            let sort = this.sort(s)?;
            let n = from_utf8(name)
                .map_err(|_| Error::Parse("identifier is not utf-8".into()))?
                .to_owned();
            this.bind(name, var(n, sort));
            Ok(name)
        })
    }

    /// Parse declarations, returning names and sorts, in-order.
    fn var_decl_list(&mut self, tt: &TokTree<'src>) -> Result<Vec<(&'src [u8], String, Sort)>> {
        self.pair_list(tt, "declaration", |this, name, s| {
            let sort = this.sort(s)?;
            let n = from_utf8(name)
                .map_err(|_| Error::Parse("identifier is not utf-8".into()))?
                .to_owned();
            this.bind(name, var(n.clone(), sort.clone()));
            Ok((name, n, sort))
        })
    }

    fn field_lit(&mut self, s: &[u8]) -> Result<FieldV> {
        let (digits, m) = match s.iter().position(|b| *b == b'm') {
            Some(i) => (&s[2..i], self.parse_int(&s[i + 1..])?),
            None => {
                let m = self.modulus_stack.last().cloned().ok_or_else(|| {
                    Error::Parse(format!(
                        "field literal {} has no modulus, and no default modulus is set",
                        String::from_utf8_lossy(s)
                    ))
                })?;
                (&s[2..], m)
            }
        };
        let (neg, digits) = match digits.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, digits),
        };
        let parsed = match digits.split_first() {
            Some((b'x', hex)) => Integer::parse_radix(hex, 16),
            _ => Integer::parse(digits),
        };
        let mut v: Integer = parsed
            .map_err(|e| Error::Parse(format!("bad field literal {}: {}", String::from_utf8_lossy(s), e)))?
            .into();
        if neg {
            v = -v;
        }
        Ok(FieldV::new::<Integer>(v, m))
    }

    fn term(&mut self, tt: &TokTree<'src>) -> Result<Term> {
        use Token::{Bin, Field, Hex, Ident, Int};
        match tt {
            Leaf(Bin, s) => BitVector::from_bin_lit(s)
                .map(|b| const_(Value::BitVector(b)))
                .ok_or_else(|| Error::Parse(format!("bad binary literal {}", tt))),
            Leaf(Hex, s) => BitVector::from_hex_lit(s)
                .map(|b| const_(Value::BitVector(b)))
                .ok_or_else(|| Error::Parse(format!("bad hex literal {}", tt))),
            Leaf(Int, _) => perr(format!(
                "bare integer {} (integers may only appear as operator parameters)",
                tt
            )),
            Leaf(Field, s) => Ok(pf_lit(self.field_lit(s)?)),
            Leaf(Ident, b"false") => Ok(bool_lit(false)),
            Leaf(Ident, b"true") => Ok(bool_lit(true)),
            Leaf(Ident, n) => self.get_binding(n).cloned(),
            List(tts) => {
                let head = match tts.first() {
                    Some(h) => self.op(h)?,
                    None => return perr("expected term, got empty list"),
                };
                match head {
                    Head::Ctrl(CtrlOp::Let) => {
                        if tts.len() != 3 {
                            return perr("a let has 2 arguments: (let ((v1 t1) ... (vn tn)) t)");
                        }
                        let bindings = self.let_list(&tts[1])?;
                        let t = self.term(&tts[2])?;
                        self.unbind(bindings);
                        Ok(t)
                    }
                    Head::Ctrl(CtrlOp::Declare) => {
                        if tts.len() != 3 {
                            return perr(
                                "a declare has 2 arguments: (declare ((v1 s1) ... (vn sn)) t)",
                            );
                        }
                        let bindings = self.decl_list(&tts[1])?;
                        let t = self.term(&tts[2])?;
                        self.unbind(bindings);
                        Ok(t)
                    }
                    Head::Ctrl(CtrlOp::ArrayValue) => {
                        if tts.len() != 5 {
                            return perr(format!("bad array literal: {}", tt));
                        }
                        let key_sort = self.sort(&tts[1])?;
                        let default = self.value(&tts[2])?;
                        let size = self.usize(&tts[3])?;
                        let mut arr = Array::constant(key_sort.clone(), default.clone(), size);
                        for entry in self.unwrap_list(&tts[4], "array entries")? {
                            match entry {
                                List(kv) if kv.len() == 2 => {
                                    let k = self.value(&kv[0])?;
                                    let v = self.value(&kv[1])?;
                                    if k.sort() != key_sort || v.sort() != default.sort() {
                                        return perr(format!("ill-sorted array entry {}", entry));
                                    }
                                    if arr.index_of(&k).is_none() {
                                        return perr(format!("array key out of range: {}", entry));
                                    }
                                    arr = arr.store(k, v);
                                }
                                _ => return perr(format!("bad array entry {}", entry)),
                            }
                        }
                        Ok(const_(Value::Array(arr)))
                    }
                    Head::Ctrl(CtrlOp::ListValue) => {
                        if tts.len() != 3 {
                            return perr(format!("bad list literal: {}", tt));
                        }
                        let key_sort = self.sort(&tts[1])?;
                        let vals = self
                            .unwrap_list(&tts[2], "list values")?
                            .iter()
                            .map(|tti| self.value(tti))
                            .collect::<Result<Vec<_>>>()?;
                        let default = match vals.first() {
                            Some(v) => v.sort().default_value(),
                            None => return perr("empty list literal"),
                        };
                        let mut arr = Array::constant(key_sort.clone(), default, vals.len());
                        for (i, v) in vals.into_iter().enumerate() {
                            arr = arr.store(key_sort.nth_elem(i), v);
                        }
                        Ok(const_(Value::Array(arr)))
                    }
                    Head::Ctrl(CtrlOp::TupleValue) => Ok(const_(Value::Tuple(
                        tts[1..]
                            .iter()
                            .map(|tti| self.value(tti))
                            .collect::<Result<Vec<_>>>()?
                            .into(),
                    ))),
                    Head::Ctrl(CtrlOp::SetDefaultModulus) => {
                        if tts.len() != 3 {
                            return perr("a set_default_modulus has 2 arguments: modulus and term");
                        }
                        let m = self.int(&tts[1])?;
                        self.modulus_stack.push(m);
                        let t = self.term(&tts[2]);
                        self.modulus_stack.pop();
                        t
                    }
                    Head::Op(o) => {
                        if let Some(n) = o.arity() {
                            if n != tts.len() - 1 {
                                return perr(format!(
                                    "{} takes {} arguments, but got {}",
                                    o,
                                    n,
                                    tts.len() - 1
                                ));
                            }
                        }
                        let cs = tts[1..]
                            .iter()
                            .map(|tti| self.term(tti))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(try_term(o, cs)?)
                    }
                }
            }
            Leaf(Token::Open | Token::Close | Token::Error, _) => {
                perr(format!("unexpected token {}", tt))
            }
        }
    }

    fn vis(&mut self, tt: &TokTree<'src>) -> Result<InputVis> {
        match tt {
            Leaf(Token::Ident, b"public") => Ok(InputVis::Public),
            Leaf(Token::Ident, b"private") => Ok(InputVis::Private),
            List(ls) => match &ls[..] {
                [Leaf(Token::Ident, b"committed"), n] => Ok(InputVis::Committed(self.usize(n)?)),
                [Leaf(Token::Ident, b"round"), n] => Ok(InputVis::Round(self.usize(n)?)),
                [Leaf(Token::Ident, b"random"), n] => Ok(InputVis::Random(self.usize(n)?)),
                _ => perr(format!("expected input visibility, found {}", tt)),
            },
            _ => perr(format!("expected input visibility, found {}", tt)),
        }
    }

    /// Returns a [ComputationMetadata] and a list of bindings to un-bind.
    fn metadata(
        &mut self,
        tt: &TokTree<'src>,
    ) -> Result<(ComputationMetadata, Vec<&'src [u8]>)> {
        let mut md = ComputationMetadata::default();
        let mut unbind = Vec::new();
        let tts = self.unwrap_prefix_list(tt, "metadata")?;
        let inputs = match tts {
            [inputs] => self.unwrap_prefix_list(inputs, "inputs")?,
            _ => return perr(format!("expected (metadata (inputs ..)), found {}", tt)),
        };
        for input in inputs {
            let parts = self.unwrap_list(input, "input declaration")?;
            let (name, sort, vis) = match parts {
                [name, sort] => (name, self.sort(sort)?, InputVis::Private),
                [name, sort, vis] => (name, self.sort(sort)?, self.vis(vis)?),
                _ => return perr(format!("expected input declaration, found {}", input)),
            };
            let name_bytes = self.ident(name)?;
            let name = self.ident_string(name)?;
            if md.input(&name).is_some() {
                return perr(format!("input {} is declared twice", name));
            }
            let t = md.new_input(name, sort, vis);
            self.bind(name_bytes, t);
            unbind.push(name_bytes);
        }
        Ok((md, unbind))
    }

    /// Parse a pre-computation.
    fn precompute(&mut self, tt: &TokTree<'src>) -> Result<precomp::PreComp> {
        let mut p = precomp::PreComp::new();
        let tts = self.unwrap_prefix_list(tt, "precompute")?;
        if tts.len() != 3 {
            return perr(format!(
                "precompute should have 3 children, but has {}",
                tts.len()
            ));
        }
        let inputs = self.decl_list(&tts[0])?;
        let outputs = self.var_decl_list(&tts[1])?;
        let tuple_term = self.term(&tts[2])?;
        if tuple_term.op != Op::Tuple || tuple_term.cs.len() != outputs.len() {
            return perr(format!(
                "precompute should end in a {}-tuple, found {}",
                outputs.len(),
                tuple_term
            ));
        }
        let mut unbind = inputs;
        for ((bytes, n, s), t) in outputs.into_iter().zip(&tuple_term.cs) {
            let found = check_raw(t)?;
            if found != s {
                return perr(format!("precompute output {} is {}, not {}", n, found, s));
            }
            p.add_output(n, t.clone());
            unbind.push(bytes);
        }
        self.unbind(unbind);
        Ok(p)
    }

    /// Parse a computation.
    fn computation(&mut self, tt: &TokTree<'src>) -> Result<Computation> {
        let tts = self.unwrap_prefix_list(tt, "computation")?;
        let (metadata, input_names) = match tts.first() {
            Some(m) => self.metadata(m)?,
            None => return perr("a computation needs metadata"),
        };
        let mut rest = &tts[1..];
        let precomputes = match rest.first() {
            Some(List(ls)) if ls.first() == Some(&Leaf(Token::Ident, b"precompute")) => {
                rest = &rest[1..];
                self.precompute(&tts[1])?
            }
            _ => precomp::PreComp::new(),
        };
        let mut outputs = Vec::new();
        for tti in rest {
            let t = self.term(tti)?;
            let s = check_raw(&t)?;
            if s != Sort::Bool {
                return perr(format!("assertion {} has sort {}, not bool", t, s));
            }
            outputs.push(t);
        }
        self.unbind(input_names);
        Ok(Computation {
            outputs,
            metadata,
            precomputes,
        })
    }
}

/// Parse a term.
pub fn parse_term(src: &[u8]) -> Result<Term> {
    let tree = parse_tok_tree(src)?;
    let mut i = IrInterp::new();
    i.term(&tree)
}

/// Write `t`, naming the subterms in `names` rather than expanding them.
fn write_term(t: &Term, names: &TermMap<String>, out: &mut String) {
    if let Some(n) = names.get(t) {
        out.push_str(n);
    } else if t.cs.is_empty() && t.op.arity() != Some(0) {
        // a nullary application of an n-ary operator, e.g. an empty tuple
        let _ = write!(out, "({})", t.op);
    } else if t.cs.is_empty() {
        let _ = write!(out, "{}", t.op);
    } else {
        let _ = write!(out, "({}", t.op);
        for c in &t.cs {
            out.push(' ');
            write_term(c, names, out);
        }
        out.push(')');
    }
}

/// Write `t` with its shared subterms let-bound, but without declaring its free variables.
fn serialize_body(t: &Term) -> String {
    let mut parents: TermMap<usize> = TermMap::new();
    let order: Vec<Term> = PostOrderIter::new(t.clone()).collect();
    for s in &order {
        for c in &s.cs {
            *parents.entry(c.clone()).or_insert(0) += 1;
        }
    }
    let mut names: TermMap<String> = TermMap::new();
    let mut lets = String::new();
    for s in &order {
        if !s.cs.is_empty() && parents.get(s).copied().unwrap_or(0) > 1 {
            let name = format!("'{}", names.len());
            let _ = write!(lets, "\n  ({} ", name);
            write_term(s, &names, &mut lets);
            lets.push(')');
            names.insert(s.clone(), name);
        }
    }
    let mut body = String::new();
    write_term(t, &names, &mut body);
    if lets.is_empty() {
        body
    } else {
        format!("(let ({}\n ) {})", lets, body)
    }
}

/// Serialize a term as a parseable string.
///
/// Free variables are declared, and shared subterms are let-bound.
pub fn serialize_term(t: &Term) -> String {
    let body = serialize_body(t);
    let free = extras::free_variables_with_sorts(t.clone());
    if free.is_empty() {
        body
    } else {
        let mut out = String::from("(declare (");
        for (n, s) in &free {
            let _ = write!(out, "\n  ({} {})", n, s);
        }
        let _ = write!(out, "\n ) {})", body);
        out
    }
}

fn value_map(i: IrInterp) -> Result<HashMap<String, Value>> {
    i.bindings
        .iter()
        .filter_map(|(name, terms)| terms.last().map(|t| (name, t)))
        .map(|(name, term)| {
            let name = String::from_utf8_lossy(name).into_owned();
            match &term.op {
                Op::Const(v) => Ok((name, v.clone())),
                _ => perr(format!("non-value binding {} for {}", term, name)),
            }
        })
        .collect()
}

/// Parse an IR "value map": a map from strings to values.
///
/// A serialized IR map is a subset of serialized IR terms. It must have
/// let-bindings for each map entry. Each entry *must* be bound to a value
/// literal. Later duplicates win.
///
/// The value of the term does not matter, and is ignored.
pub fn parse_value_map(src: &[u8]) -> Result<HashMap<String, Value>> {
    let tree = parse_tok_tree(src)?;
    let mut i = IrInterp::new();
    i.do_unbinds = false;
    i.term(&tree)?;
    value_map(i)
}

/// Parse an IR value map in which field literals without a modulus belong to `field`.
pub fn parse_value_map_with_field(src: &[u8], field: &FieldT) -> Result<HashMap<String, Value>> {
    let tree = parse_tok_tree(src)?;
    let mut i = IrInterp::new();
    i.do_unbinds = false;
    i.modulus_stack.push(field.modulus_arc());
    i.term(&tree)?;
    value_map(i)
}

/// Serialize an IR "value map": a map from strings to values. Entries are sorted by name.
///
/// See [parse_value_map].
pub fn serialize_value_map(src: &HashMap<String, Value>) -> String {
    let mut entries: Vec<(&String, &Value)> = src.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let mut out = String::new();
    out.push_str("(let (\n");
    for (var, val) in entries {
        let _ = writeln!(out, "  ({} {})", var, val);
    }
    out.push_str(") true ; ignored\n)\n");
    out
}

/// Parse a computation.
pub fn parse_computation(src: &[u8]) -> Result<Computation> {
    let tree = parse_tok_tree(src)?;
    let mut i = IrInterp::new();
    i.computation(&tree)
}

/// Serialize a computation.
pub fn serialize_computation(c: &Computation) -> String {
    let mut out = String::new();
    out.push_str("(computation\n (metadata\n  (inputs");
    for i in c.metadata.inputs() {
        let _ = write!(out, "\n   ({} {} {})", i.name, i.sort, i.vis);
    }
    out.push_str("\n  )\n )\n");
    let pre = &c.precomputes;
    if !pre.sequence().is_empty() {
        let mut sorts = BTreeMap::new();
        for t in pre.outputs().values() {
            sorts.extend(extras::free_variables_with_sorts(t.clone()));
        }
        out.push_str(" (precompute\n  (");
        for n in pre.inputs() {
            if let Some(s) = sorts.get(&n) {
                let _ = write!(out, "({} {})", n, s);
            }
        }
        out.push_str(")\n  (");
        let mut elems = Vec::new();
        for n in pre.sequence() {
            if let Some(t) = pre.outputs().get(n) {
                let _ = write!(out, "({} {})", n, check(t));
                elems.push(t.clone());
            }
        }
        out.push_str(")\n  ");
        out.push_str(&serialize_body(&term(Op::Tuple, elems)));
        out.push_str("\n )\n");
    }
    // assertions are in the scope of the declared inputs
    for o in &c.outputs {
        let _ = writeln!(out, " {}", serialize_body(o));
    }
    out.push_str(")\n");
    out
}
