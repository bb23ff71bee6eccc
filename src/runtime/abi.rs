//! Runtime ABI (spec.md §6): the `extern "C"` entry points JIT-compiled
//! code calls by name. [`FunctionRegistry::resolve_name`] never sees these
//! addresses directly — [`runtime_symbol_address`] is the `resolve_external`
//! closure [`crate::compiler::manager::CompilationManager::compile`] is
//! given, so an unresolved call to anything outside this table is a link
//! error rather than a segfault.

use crate::runtime::event_loop::EventLoop;
use crate::runtime::object::{ClassInfo, ObjectRegistry};
use crate::runtime::value::ValueHeap;
use std::collections::HashMap;
use std::sync::OnceLock;

static OBJECTS: OnceLock<ObjectRegistry> = OnceLock::new();
static VALUES: OnceLock<ValueHeap> = OnceLock::new();

fn objects() -> &'static ObjectRegistry {
    OBJECTS.get_or_init(ObjectRegistry::new)
}

fn values() -> &'static ValueHeap {
    VALUES.get_or_init(ValueHeap::new)
}

/// Resolve a runtime ABI symbol by name to the address JIT-compiled `call`
/// instructions should target. Interned-literal and class-specific symbols
/// (`__string_intern_literal_<hex>`, `__class_field_count_<name>`, ...) are
/// handled by the compilation manager before falling back here, since their
/// behavior is parameterized by data baked in at compile time rather than
/// fixed at a single address.
pub fn runtime_symbol_address(name: &str) -> Option<usize> {
    symbol_table().get(name).copied()
}

macro_rules! abi_table {
    ($($name:literal => $f:expr),* $(,)?) => {
        fn symbol_table() -> &'static HashMap<&'static str, usize> {
            static TABLE: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
            TABLE.get_or_init(|| {
                let mut m = HashMap::new();
                $(m.insert($name, $f as usize);)*
                m
            })
        }
    };
}

abi_table! {
    "__console_log_int" => console_log_int,
    "__console_log_float" => console_log_float,
    "__console_log_string" => console_log_string,
    "__console_log_array" => console_log_array,
    "__console_log_object" => console_log_object,
    "__console_log_auto" => console_log_auto,
    "__console_log_space" => console_log_space,
    "__console_log_newline" => console_log_newline,

    "__string_create_empty" => string_create_empty,
    "__string_concat" => string_concat,
    "__string_concat_cstr" => string_concat_cstr,
    "__string_concat_cstr_left" => string_concat_cstr_left,
    "__string_length" => string_length,

    "__simple_array_create" => simple_array_create,
    "__simple_array_push" => simple_array_push,
    "__simple_array_pop" => simple_array_pop,
    "__simple_array_get" => simple_array_get,
    "__simple_array_length" => simple_array_length,
    "__simple_array_slice" => simple_array_slice,
    "__simple_array_sum" => simple_array_sum,
    "__simple_array_mean" => simple_array_mean,
    "__simple_array_max" => simple_array_max,
    "__simple_array_min" => simple_array_min,
    "__simple_array_toString" => simple_array_to_string,

    "__array_create" => array_create,
    "__array_push" => array_push,
    "__array_access" => array_access,
    "__array_size" => array_size,

    // The `ValueHeap` array representation underneath every typed variant
    // is the same flat `Vec<i64>` regardless of declared element width
    // (spec.md §3 "width is implicit in the tag"), so every `_<T>` suffix
    // aliases onto the one untyped implementation — the same aliasing
    // `__array_create`/`__simple_array_create` already do above.
    "__typed_array_create_int32" => simple_array_create,
    "__typed_array_create_int64" => simple_array_create,
    "__typed_array_create_float32" => simple_array_create,
    "__typed_array_create_float64" => simple_array_create,
    "__typed_array_create_uint8" => simple_array_create,
    "__typed_array_create_uint16" => simple_array_create,
    "__typed_array_create_uint32" => simple_array_create,
    "__typed_array_create_uint64" => simple_array_create,
    "__typed_array_push_int32" => simple_array_push,
    "__typed_array_push_int64" => simple_array_push,
    "__typed_array_push_float32" => simple_array_push,
    "__typed_array_push_float64" => simple_array_push,
    "__typed_array_push_uint8" => simple_array_push,
    "__typed_array_push_uint16" => simple_array_push,
    "__typed_array_push_uint32" => simple_array_push,
    "__typed_array_push_uint64" => simple_array_push,

    "__object_create" => object_create,
    "__object_create_anonymous" => object_create_anonymous,
    "__object_get_property" => object_get_property,
    "__object_set_property" => object_set_property,
    "__object_set_property_name" => object_set_property_name,
    "__object_get_property_name" => object_get_property_name,
    "__object_field_count" => object_field_count,
    "__super_constructor_call" => super_constructor_call,
    "__parent_method_dispatch" => parent_method_dispatch,
    "__dynamic_method_dispatch" => dynamic_method_dispatch,

    "__regex_create_literal" => regex_create_literal,
    "__regex_test" => regex_test,
    "__regex_exec" => regex_exec,
    "__regex_source" => regex_source,
    "__regex_global" => regex_global,
    "__regex_ignore_case" => regex_ignore_case,

    "__runtime_pow" => runtime_pow,
    "__runtime_modulo" => runtime_modulo,
    "__runtime_js_equal" => runtime_js_equal,
    "__runtime_float_add" => runtime_float_add,
    "__runtime_float_sub" => runtime_float_sub,
    "__runtime_float_mul" => runtime_float_mul,
    "__runtime_float_div" => runtime_float_div,
    "__runtime_string_intern_bytes" => runtime_string_intern_bytes,

    "__goroutine_spawn" => goroutine_spawn,
    "__goroutine_spawn_direct" => goroutine_spawn,
    "__goroutine_spawn_with_offset" => goroutine_spawn,
    "__promise_await" => promise_await,
    "__promise_all" => promise_all,
    "__promise_all_alloc" => promise_all_alloc,
    "__promise_all_push" => promise_all_push,
    "__promise_then" => promise_then,

    "__gots_set_timeout" => gots_set_timeout,
    "__gots_clear_timeout" => gots_clear_timeout,
    "__gots_set_interval" => gots_set_interval,
    "__gots_clear_interval" => gots_clear_interval,
}

// ---- console ---------------------------------------------------------

extern "C" fn console_log_int(value: i64) {
    print!("{}", value);
}

extern "C" fn console_log_float(bits: i64) {
    print!("{}", f64::from_bits(bits as u64));
}

extern "C" fn console_log_string(handle: i64) {
    if let Some(s) = values().string_value(handle) {
        print!("{}", s);
    }
}

extern "C" fn console_log_array(handle: i64) {
    let len = values().array_length(handle);
    print!("[");
    for i in 0..len {
        if i > 0 {
            print!(", ");
        }
        print!("{}", values().array_get(handle, i));
    }
    print!("]");
}

extern "C" fn console_log_object(handle: i64) {
    match objects().class_name_of(handle) {
        Some(name) => print!("{} {{ .. }}", name),
        None => print!("[object]"),
    }
}

extern "C" fn console_log_auto(value: i64) {
    print!("{}", value);
}

extern "C" fn console_log_space() {
    print!(" ");
}

extern "C" fn console_log_newline() {
    println!();
}

// ---- strings -----------------------------------------------------------

extern "C" fn string_create_empty() -> i64 {
    values().create_empty_string()
}

extern "C" fn string_concat(a: i64, b: i64) -> i64 {
    values().concat(a, b)
}

/// A literal operand's bytes already live in the arena as NUL-terminated
/// plain data (spec.md §4.5, §8 scenario 2), so the `cstr` variants read
/// it directly off the RIP-addressed pointer instead of going through a
/// heap string handle first.
extern "C" fn string_concat_cstr(handle: i64, cstr: i64) -> i64 {
    let left = values().string_value(handle).unwrap_or_default();
    values().create_string(&format!("{}{}", left, read_cstr(cstr)))
}

extern "C" fn string_concat_cstr_left(cstr: i64, handle: i64) -> i64 {
    let right = values().string_value(handle).unwrap_or_default();
    values().create_string(&format!("{}{}", read_cstr(cstr), right))
}

fn read_cstr(ptr: i64) -> String {
    if ptr == 0 {
        return String::new();
    }
    unsafe { std::ffi::CStr::from_ptr(ptr as *const std::os::raw::c_char) }
        .to_string_lossy()
        .into_owned()
}

extern "C" fn string_length(handle: i64) -> i64 {
    values().string_length(handle)
}

/// Backs the per-literal interning thunks the compilation manager emits
/// for every distinct string literal and class name in a program (spec.md
/// §4.5): `ptr`/`len` point at UTF-8 bytes the manager embedded directly
/// into the arena as data, RIP-addressed via `lea` at the thunk's call
/// site.
extern "C" fn runtime_string_intern_bytes(ptr: i64, len: i64) -> i64 {
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) };
    let s = std::str::from_utf8(bytes).unwrap_or("");
    values().intern_literal(s)
}

// ---- arrays --------------------------------------------------------------

extern "C" fn simple_array_create() -> i64 {
    values().create_array()
}

extern "C" fn simple_array_push(handle: i64, value: i64) {
    values().array_push(handle, value);
}

extern "C" fn simple_array_pop(handle: i64) -> i64 {
    values().array_pop(handle)
}

extern "C" fn simple_array_get(handle: i64, index: i64) -> i64 {
    values().array_get(handle, index)
}

extern "C" fn simple_array_length(handle: i64) -> i64 {
    values().array_length(handle)
}

extern "C" fn simple_array_slice(handle: i64, start: i64, end: i64) -> i64 {
    values().array_slice(handle, start, end)
}

extern "C" fn simple_array_sum(handle: i64) -> i64 {
    values().array_sum(handle)
}

extern "C" fn simple_array_mean(handle: i64) -> i64 {
    values().array_mean(handle)
}

extern "C" fn simple_array_max(handle: i64) -> i64 {
    values().array_max(handle)
}

extern "C" fn simple_array_min(handle: i64) -> i64 {
    values().array_min(handle)
}

extern "C" fn simple_array_to_string(handle: i64) -> i64 {
    values().array_to_string(handle)
}

extern "C" fn array_create() -> i64 {
    values().create_array()
}

extern "C" fn array_push(handle: i64, value: i64) {
    values().array_push(handle, value);
}

extern "C" fn array_access(handle: i64, index: i64) -> i64 {
    values().array_get(handle, index)
}

extern "C" fn array_size(handle: i64) -> i64 {
    values().array_length(handle)
}

// ---- objects -------------------------------------------------------------

extern "C" fn object_create(class_name_handle: i64, field_count: i64) -> i64 {
    let name = values().string_value(class_name_handle).unwrap_or_default();
    objects().create(&name, field_count as usize)
}

extern "C" fn object_create_anonymous(field_count: i64) -> i64 {
    objects().create("__anonymous__", field_count as usize)
}

extern "C" fn object_get_property(id: i64, index: i64) -> i64 {
    objects().get_property(id, index as usize)
}

extern "C" fn object_set_property(id: i64, value: i64, index: i64) {
    objects().set_property(id, index as usize, value);
}

extern "C" fn object_set_property_name(id: i64, name_handle: i64, index: i64) {
    objects().set_property_name(id, index as usize, name_handle);
}

extern "C" fn object_get_property_name(id: i64, index: i64) -> i64 {
    objects().get_property_name(id, index as usize)
}

extern "C" fn object_field_count(id: i64) -> i64 {
    objects().field_count(id) as i64
}

/// Declared unsupported (spec.md "Open questions"): this crate's class model
/// has no parent-chain walk, so a `super(...)`/`super.method(...)` call
/// still compiles and links against a real symbol, but resolves to a
/// sentinel rather than dispatching to an actual parent constructor/method.
extern "C" fn super_constructor_call(_this: i64) -> i64 {
    0
}

extern "C" fn parent_method_dispatch(_this: i64, _method_handle: i64) -> i64 {
    0
}

extern "C" fn dynamic_method_dispatch(_this: i64) -> i64 {
    0
}

/// Register a class's field layout ahead of any `new ClassName(...)`; the
/// compilation manager calls this during discovery (spec.md §4.6 phase 1),
/// not from JIT-compiled code.
pub fn register_class(name: &str, parent: Option<&str>, field_names: Vec<String>) {
    objects().register_class(ClassInfo { name: name.to_string(), parent: parent.map(str::to_string), field_names });
}

// ---- regex -----------------------------------------------------------------
//
// Out of scope for this core (spec.md §1 "the regex engine" is an external
// collaborator); these are a minimal literal-substring stand-in rather than
// a real pattern engine, just enough for the ABI symbols emitted code calls
// to link and return a plausible answer — no backtracking, no character
// classes. `pattern`/`flags` for a `__regex_create_literal` call are not
// currently threaded through from the AST's `Literal::Regex` (the emitter
// calls it with zero arguments), so every literal regex is the empty
// pattern; `test`/`exec` against it behave like an always-matches search.
extern "C" fn regex_create_literal() -> i64 {
    values().create_regex("", "")
}

extern "C" fn regex_test(handle: i64, subject: i64) -> i64 {
    values().regex_test(handle, subject) as i64
}

extern "C" fn regex_exec(handle: i64, subject: i64) -> i64 {
    values().regex_exec(handle, subject)
}

extern "C" fn regex_source(handle: i64) -> i64 {
    values().regex_source(handle)
}

extern "C" fn regex_global(handle: i64) -> i64 {
    values().regex_is_global(handle) as i64
}

extern "C" fn regex_ignore_case(handle: i64) -> i64 {
    values().regex_is_ignore_case(handle) as i64
}

// ---- numeric / equality runtime helpers -----------------------------------

extern "C" fn runtime_pow(base_bits: i64, exp_bits: i64) -> i64 {
    let base = f64::from_bits(base_bits as u64);
    let exp = f64::from_bits(exp_bits as u64);
    base.powf(exp).to_bits() as i64
}

extern "C" fn runtime_modulo(a: i64, b: i64) -> i64 {
    if b == 0 {
        0
    } else {
        a % b
    }
}

/// The code generator keeps floats as raw bit patterns in general-purpose
/// registers and has no SSE instruction support, so same-typed float
/// arithmetic (spec.md §4.4) is dispatched here rather than to a direct
/// `add`/`sub`/`imul` sequence.
extern "C" fn runtime_float_add(a_bits: i64, b_bits: i64) -> i64 {
    (f64::from_bits(a_bits as u64) + f64::from_bits(b_bits as u64)).to_bits() as i64
}

extern "C" fn runtime_float_sub(a_bits: i64, b_bits: i64) -> i64 {
    (f64::from_bits(a_bits as u64) - f64::from_bits(b_bits as u64)).to_bits() as i64
}

extern "C" fn runtime_float_mul(a_bits: i64, b_bits: i64) -> i64 {
    (f64::from_bits(a_bits as u64) * f64::from_bits(b_bits as u64)).to_bits() as i64
}

extern "C" fn runtime_float_div(a_bits: i64, b_bits: i64) -> i64 {
    (f64::from_bits(a_bits as u64) / f64::from_bits(b_bits as u64)).to_bits() as i64
}

/// JS-style loose equality across the `DataType` tags `emit.rs` can't
/// resolve statically (spec.md §4.5): numeric types compare by value after
/// widening, strings compare by content, everything else falls back to
/// handle identity.
extern "C" fn runtime_js_equal(left: i64, left_type: i64, right: i64, right_type: i64) -> i64 {
    use crate::types::DataType;
    let decode = |tag: i64| -> DataType {
        const TAGS: [DataType; 23] = [
            DataType::Unknown,
            DataType::Void,
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::Int64,
            DataType::UInt8,
            DataType::UInt16,
            DataType::UInt32,
            DataType::UInt64,
            DataType::Float32,
            DataType::Float64,
            DataType::Boolean,
            DataType::String,
            DataType::Array,
            DataType::Tensor,
            DataType::Regex,
            DataType::Promise,
            DataType::ClassInstance,
            DataType::Function,
            DataType::Slice,
            DataType::RuntimeObject,
            DataType::Any,
        ];
        TAGS.get(tag as usize).copied().unwrap_or(DataType::Unknown)
    };
    let lt = decode(left_type);
    let rt = decode(right_type);

    if lt == DataType::String || rt == DataType::String {
        let ls = values().string_value(left);
        let rs = values().string_value(right);
        return (ls == rs) as i64;
    }
    if lt.is_numeric() && rt.is_numeric() {
        let lf = if lt.is_float() { f64::from_bits(left as u64) } else { left as f64 };
        let rf = if rt.is_float() { f64::from_bits(right as u64) } else { right as f64 };
        return (lf == rf) as i64;
    }
    (left == right) as i64
}

// ---- concurrency ---------------------------------------------------------

extern "C" fn goroutine_spawn(function_address: i64) -> i64 {
    let function_address = function_address as usize;
    let promise = EventLoop::global().spawn(Box::new(move || {
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(function_address) };
        f()
    }));
    // The promise handle itself is heap-resident (spec.md §3); park it
    // behind an object instance so `DataType::Promise`-typed slots carry
    // the same kind of opaque handle every other heap value does.
    register_promise(promise)
}

extern "C" fn promise_await(handle: i64) -> i64 {
    lookup_promise(handle).map(|p| p.block_until_resolved()).unwrap_or(0)
}

/// Backs `Promise.all([...])`'s array-literal argument form (spec.md §6
/// `__promise_all`): the emitter allocates a scratch array via
/// `promise_all_alloc`, pushes each constituent promise's handle into it
/// with `promise_all_push`, then this call blocks on every one in turn and
/// resolves a fresh promise to an array of their individual values — not
/// [`crate::runtime::promise::Promise::all`]'s count, which answers a
/// different question (how many settled) than "what did they resolve to".
extern "C" fn promise_all_alloc(_count: i64) -> i64 {
    values().create_array()
}

extern "C" fn promise_all_push(list_handle: i64, promise_handle: i64) {
    values().array_push(list_handle, promise_handle);
}

extern "C" fn promise_all(list_handle: i64) -> i64 {
    let len = values().array_length(list_handle);
    let results = values().create_array();
    for i in 0..len {
        let promise_handle = values().array_get(list_handle, i);
        let value = lookup_promise(promise_handle).map(|p| p.block_until_resolved()).unwrap_or(0);
        values().array_push(results, value);
    }
    let combined = crate::runtime::promise::Promise::new();
    combined.resolve(results);
    register_promise(combined)
}

/// Backs `.then(callback)` on a promise (spec.md §6 `__promise_then`):
/// returns a new promise that resolves to the callback's return value once
/// the source promise resolves, without blocking the calling goroutine
/// (the callback itself runs on whichever thread eventually settles the
/// source, per `Promise::then`'s immediate-or-queued firing).
extern "C" fn promise_then(promise_handle: i64, callback_address: i64) -> i64 {
    let callback_address = callback_address as usize;
    let derived = crate::runtime::promise::Promise::new();
    if let Some(source) = lookup_promise(promise_handle) {
        let derived_for_callback = derived.clone();
        source.then(move |value| {
            let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(callback_address) };
            derived_for_callback.resolve(f(value));
        });
    }
    register_promise(derived)
}

extern "C" fn gots_set_timeout(callback_address: i64, delay_ms: i64) -> i64 {
    let callback_address = callback_address as usize;
    EventLoop::global().set_timeout(delay_ms.max(0) as u64, move || {
        let f: extern "C" fn() = unsafe { std::mem::transmute(callback_address) };
        f();
    }) as i64
}

extern "C" fn gots_clear_timeout(id: i64) {
    EventLoop::global().clear_timer(id as u64);
}

extern "C" fn gots_set_interval(callback_address: i64, interval_ms: i64) -> i64 {
    let callback_address = callback_address as usize;
    EventLoop::global().set_interval(interval_ms.max(1) as u64, move || {
        let f: extern "C" fn() = unsafe { std::mem::transmute(callback_address) };
        f();
    }) as i64
}

extern "C" fn gots_clear_interval(id: i64) {
    EventLoop::global().clear_timer(id as u64);
}

static PROMISES: OnceLock<std::sync::RwLock<HashMap<i64, crate::runtime::promise::Promise>>> = OnceLock::new();
static NEXT_PROMISE_HANDLE: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(1);

fn register_promise(promise: crate::runtime::promise::Promise) -> i64 {
    let table = PROMISES.get_or_init(|| std::sync::RwLock::new(HashMap::new()));
    let handle = NEXT_PROMISE_HANDLE.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    table.write().unwrap().insert(handle, promise);
    handle
}

fn lookup_promise(handle: i64) -> Option<crate::runtime::promise::Promise> {
    PROMISES.get().and_then(|table| table.read().unwrap().get(&handle).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_table_resolves_every_registered_name() {
        assert!(runtime_symbol_address("__string_concat").is_some());
        assert!(runtime_symbol_address("__runtime_js_equal").is_some());
        assert!(runtime_symbol_address("__does_not_exist").is_none());
    }

    #[test]
    fn js_equal_compares_numeric_values_after_decoding_tags() {
        let int_tag = crate::types::DataType::Int64 as i64;
        assert_eq!(runtime_js_equal(5, int_tag, 5, int_tag), 1);
        assert_eq!(runtime_js_equal(5, int_tag, 6, int_tag), 0);
    }

    #[test]
    fn string_intern_bytes_round_trips_through_a_raw_pointer() {
        let text = "hello";
        let handle = runtime_string_intern_bytes(text.as_ptr() as i64, text.len() as i64);
        assert_eq!(values().string_value(handle).as_deref(), Some("hello"));
    }

    #[test]
    fn goroutine_spawn_and_await_round_trip() {
        // A stub compiled body: `mov rax, 99; ret`. Good enough to prove
        // the spawn->await ABI path without involving the full JIT.
        let mut arena = crate::compiler::Arena::new();
        {
            let mut cg = crate::compiler::codegen::CodeGenerator::new(&mut arena);
            cg.mov_reg_imm(crate::compiler::codegen::Reg::RAX, 99).unwrap();
            cg.ret_immediate().unwrap();
        }
        arena.finalize(|_| None).unwrap();
        let addr = arena.base_ptr().unwrap() as i64;
        let handle = goroutine_spawn(addr);
        let result = promise_await(handle);
        assert_eq!(result, 99);
        std::mem::forget(arena); // keep the page mapped past this scope
    }
}
