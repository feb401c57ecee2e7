#![cfg(feature = "python")]

#[cfg(feature = "numpy-support")]
use numpy::PyReadonlyArray1;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::marker::PhantomData;

use crate::{distance_correlation, distance_correlation_components, METRIC_ID};

enum DataView<'a> {
    Owned(Vec<f64>, PhantomData<&'a ()>),
    #[cfg(feature = "numpy-support")]
    Numpy(PyReadonlyArray1<'a, f64>),
}

impl<'a> DataView<'a> {
    fn as_slice(&self) -> PyResult<&[f64]> {
        match self {
            DataView::Owned(v, _) => Ok(v.as_slice()),
            #[cfg(feature = "numpy-support")]
            DataView::Numpy(array) => array
                .as_slice()
                .map_err(|_| PyValueError::new_err("numpy array must be contiguous")),
        }
    }
}

fn extract_view<'py>(obj: &Bound<'py, PyAny>) -> PyResult<DataView<'py>> {
    #[cfg(feature = "numpy-support")]
    {
        if let Ok(array) = obj.extract::<PyReadonlyArray1<'py, f64>>() {
            if array.as_slice().is_ok() {
                return Ok(DataView::Numpy(array));
            }
        }
    }

    let owned = obj.extract::<Vec<f64>>()?;
    Ok(DataView::Owned(owned, PhantomData))
}

/// Python API wrapper for distance_correlation
#[pyfunction]
#[pyo3(name = "distance_correlation")]
fn distance_correlation_py(u: &Bound<'_, PyAny>, v: &Bound<'_, PyAny>) -> PyResult<f64> {
    let u_view = extract_view(u)?;
    let v_view = extract_view(v)?;
    distance_correlation(u_view.as_slice()?, v_view.as_slice()?)
        .map_err(|err| PyValueError::new_err(err.to_string()))
}

/// Python API wrapper for distance_correlation_components
#[pyfunction]
#[pyo3(name = "distance_correlation_components")]
fn distance_correlation_components_py<'py>(
    py: Python<'py>,
    u: &Bound<'py, PyAny>,
    v: &Bound<'py, PyAny>,
) -> PyResult<Bound<'py, PyDict>> {
    let u_view = extract_view(u)?;
    let v_view = extract_view(v)?;
    let components = distance_correlation_components(u_view.as_slice()?, v_view.as_slice()?)
        .map_err(|err| PyValueError::new_err(err.to_string()))?;

    let dict = PyDict::new_bound(py);
    dict.set_item("dcov2_xy", components.dcov2_xy)?;
    dict.set_item("dvar2_x", components.dvar2_x)?;
    dict.set_item("dvar2_y", components.dvar2_y)?;
    dict.set_item("dcor", components.dcor)?;
    dict.set_item("metric_id", METRIC_ID)?;
    Ok(dict)
}

#[pymodule]
fn cellmatch_core(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(distance_correlation_py, m)?)?;
    m.add_function(wrap_pyfunction!(distance_correlation_components_py, m)?)?;
    m.add("METRIC_ID", METRIC_ID)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "numpy-support")]
    use numpy::PyArray1;
    use pyo3::types::PyList;
    use pyo3::Python;

    #[test]
    fn extract_view_vec_fallback() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let list = PyList::new_bound(py, vec![1.0_f64, 2.0, 3.0]);
            let view = extract_view(list.as_any()).unwrap();
            match view {
                DataView::Owned(values, _) => assert_eq!(values, vec![1.0, 2.0, 3.0]),
                #[cfg(feature = "numpy-support")]
                DataView::Numpy(_) => panic!("expected owned fallback for list input"),
            }
        });
    }

    #[test]
    fn degenerate_input_raises_value_error() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let u = PyList::new_bound(py, vec![1.0_f64, 2.0, 3.0]);
            let v = PyList::new_bound(py, vec![4.0_f64, 4.0, 4.0]);
            let err = distance_correlation_py(u.as_any(), v.as_any()).unwrap_err();
            assert!(err.is_instance_of::<PyValueError>(py));
        });
    }

    #[test]
    fn components_dict_has_dcor() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let u = PyList::new_bound(py, vec![1.0_f64, 2.0, 3.0, 4.0]);
            let v = PyList::new_bound(py, vec![2.0_f64, 4.0, 6.0, 8.0]);
            let dict = distance_correlation_components_py(py, u.as_any(), v.as_any()).unwrap();
            let dcor: f64 = dict.get_item("dcor").unwrap().unwrap().extract().unwrap();
            assert!((dcor - 1.0).abs() < 1e-9);
        });
    }

    #[cfg(feature = "numpy-support")]
    #[test]
    fn extract_view_numpy_borrow() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let array = PyArray1::from_vec_bound(py, vec![1.0_f64, 2.0, 3.0]);
            let view = extract_view(array.as_any()).unwrap();
            match view {
                DataView::Numpy(array) => {
                    assert_eq!(array.as_slice().unwrap(), &[1.0, 2.0, 3.0])
                }
                DataView::Owned(_, _) => panic!("expected numpy borrow"),
            }
        });
    }
}
