//! Conversion of Rust callables into dispatch candidates
//!
//! Free functions read their arguments from slot 1 on. Member functions take
//! their receiver from slot 1 and their arguments from slot 2 on; the
//! receiver is borrowed only after every argument has been read, so reading
//! an argument can never observe the receiver mid-call.

use std::marker::PhantomData;
use std::rc::Rc;

use moonbind_vm::{Continuation, FunctionRef, State};

use super::{Candidate, Signature};
use crate::classify::TypeDescriptor;
use crate::error::{Error, Result};
use crate::stack::{push, FromStack, Mismatch, Record, ToStack};
use crate::usertype::{check_object, resolve, short_type_name};

// ============================================================================
// Results
// ============================================================================

/// Return values of bound callables
pub trait IntoResults {
    /// Push the results, returning how many slots were written
    fn push_results(self, state: &State) -> Result<usize>;
}

impl<T: ToStack> IntoResults for T {
    fn push_results(self, state: &State) -> Result<usize> {
        push(state, self)
    }
}

impl<T: ToStack, E: Into<Error>> IntoResults for std::result::Result<T, E> {
    fn push_results(self, state: &State) -> Result<usize> {
        match self {
            Ok(v) => push(state, v),
            Err(e) => Err(e.into()),
        }
    }
}

/// Suspend the running coroutine, handing `values` to the resumer
///
/// With a continuation, the next resume calls it with the resume arguments
/// and its results become the coroutine's next output. Without one, the
/// coroutine finishes on the next resume, returning the resume arguments.
pub struct Yield<T> {
    values: T,
    then: Option<FunctionRef>,
}

impl<T: ToStack> Yield<T> {
    /// Yield `values` and finish on the next resume
    pub fn new(values: T) -> Self {
        Yield { values, then: None }
    }

    /// Yield `values` and continue with `then` on the next resume
    pub fn then<M, F: IntoFunction<M>>(values: T, then: F) -> Self {
        Yield {
            values,
            then: Some(super::function("continuation", then)),
        }
    }
}

impl<T: ToStack> IntoResults for Yield<T> {
    fn push_results(self, state: &State) -> Result<usize> {
        let n = push(state, self.values)?;
        let continuation = self.then.map(|f| -> Continuation {
            // Runs in the resumed frame, so a further yield stays legal.
            Box::new(move |state: &State| f.invoke(state))
        });
        Ok(state.yield_with(n, continuation)?)
    }
}

// ============================================================================
// Free functions
// ============================================================================

/// Callables that can be bound as VM functions
///
/// `Marker` distinguishes the blanket implementations for each arity and is
/// inferred; it never needs to be named.
pub trait IntoFunction<Marker>: 'static {
    /// Candidates to dispatch between
    fn into_candidates(self) -> Vec<Candidate>;
}

macro_rules! impl_into_function {
    ($($arg:ident)*) => {
        impl<F, R, $($arg,)*> IntoFunction<fn($($arg,)*) -> R> for F
        where
            F: Fn($($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: FromStack + 'static,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_candidates(self) -> Vec<Candidate> {
                let f = Rc::new(self);
                let signature = Signature::new(vec![$(TypeDescriptor::of::<$arg>()),*], None);
                let check = |state: &State, handler: &mut dyn FnMut(Mismatch)| {
                    let mut record = Record::new();
                    $(
                        if !$arg::check(state, 1 + record.used as i32, handler, &mut record) {
                            return false;
                        }
                    )*
                    true
                };
                let invoke = move |state: &State| {
                    let mut record = Record::new();
                    $(let $arg = $arg::get(state, 1 + record.used as i32, &mut record)?;)*
                    f($($arg),*).push_results(state)
                };
                vec![Candidate::new(signature, check, invoke)]
            }
        }
    };
}

impl_into_function!();
impl_into_function!(A);
impl_into_function!(A B);
impl_into_function!(A B C);
impl_into_function!(A B C D);
impl_into_function!(A B C D E);
impl_into_function!(A B C D E G);
impl_into_function!(A B C D E G H);
impl_into_function!(A B C D E G H I);
impl_into_function!(A B C D E G H I J);
impl_into_function!(A B C D E G H I J K);

// ============================================================================
// Member functions
// ============================================================================

/// Receiver marker: `Fn(&T, ..)`
pub struct SharedRecv(PhantomData<()>);

/// Receiver marker: `Fn(&mut T, ..)`
pub struct ExclusiveRecv(PhantomData<()>);

/// Callables that can be bound as member functions of `T`
pub trait IntoMethod<T, Marker>: 'static {
    /// Candidates to dispatch between
    fn into_method_candidates(self) -> Vec<Candidate>;
}

fn method_signature<T: 'static>(params: Vec<TypeDescriptor>) -> Signature {
    Signature::new(params, Some(short_type_name::<T>().into()))
}

macro_rules! impl_into_method {
    ($($arg:ident)*) => {
        impl<T, F, R, $($arg,)*> IntoMethod<T, (SharedRecv, fn($($arg,)*) -> R)> for F
        where
            T: 'static,
            F: Fn(&T, $($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: FromStack + 'static,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_method_candidates(self) -> Vec<Candidate> {
                let f = Rc::new(self);
                let signature = method_signature::<T>(vec![$(TypeDescriptor::of::<$arg>()),*]);
                let check = |state: &State, handler: &mut dyn FnMut(Mismatch)| {
                    if !check_object::<T>(state, 1, handler) {
                        return false;
                    }
                    let mut record = Record::new();
                    $(
                        if !$arg::check(state, 2 + record.used as i32, handler, &mut record) {
                            return false;
                        }
                    )*
                    true
                };
                let invoke = move |state: &State| {
                    let mut record = Record::new();
                    $(let $arg = $arg::get(state, 2 + record.used as i32, &mut record)?;)*
                    let (boxed, path) = resolve::<T>(state, 1)?;
                    let result = {
                        let this = boxed.borrow_as::<T>(&path)?;
                        f(&*this, $($arg),*)
                    };
                    result.push_results(state)
                };
                vec![Candidate::new(signature, check, invoke)]
            }
        }

        impl<T, F, R, $($arg,)*> IntoMethod<T, (ExclusiveRecv, fn($($arg,)*) -> R)> for F
        where
            T: 'static,
            F: Fn(&mut T, $($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: FromStack + 'static,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_method_candidates(self) -> Vec<Candidate> {
                let f = Rc::new(self);
                let signature = method_signature::<T>(vec![$(TypeDescriptor::of::<$arg>()),*]);
                let check = |state: &State, handler: &mut dyn FnMut(Mismatch)| {
                    if !check_object::<T>(state, 1, handler) {
                        return false;
                    }
                    let mut record = Record::new();
                    $(
                        if !$arg::check(state, 2 + record.used as i32, handler, &mut record) {
                            return false;
                        }
                    )*
                    true
                };
                let invoke = move |state: &State| {
                    let mut record = Record::new();
                    $(let $arg = $arg::get(state, 2 + record.used as i32, &mut record)?;)*
                    let (boxed, path) = resolve::<T>(state, 1)?;
                    let result = {
                        let mut this = boxed.borrow_mut_as::<T>(&path)?;
                        f(&mut *this, $($arg),*)
                    };
                    result.push_results(state)
                };
                vec![Candidate::new(signature, check, invoke)]
            }
        }
    };
}

impl_into_method!();
impl_into_method!(A);
impl_into_method!(A B);
impl_into_method!(A B C);
impl_into_method!(A B C D);
impl_into_method!(A B C D E);
impl_into_method!(A B C D E G);
impl_into_method!(A B C D E G H);
impl_into_method!(A B C D E G H I);
impl_into_method!(A B C D E G H I J);
